// Standardized error codes for the provider profile service

pub mod validation {
    pub const INVALID_INPUT: &str = "VALIDATION_1001";
}

pub mod database {
    pub const CONNECTION_FAILED: &str = "DB_4001";
    pub const QUERY_FAILED: &str = "DB_4002";
}

pub mod provider {
    pub const ASSOCIATION_NOT_FOUND: &str = "PROVIDER_5001";
    pub const DUPLICATE_ASSOCIATION: &str = "PROVIDER_5002";
    pub const TRANSFER_INELIGIBLE: &str = "PROVIDER_5003";
    pub const DOCTOR_NOT_FOUND: &str = "PROVIDER_5004";
    pub const CONCURRENT_MODIFICATION: &str = "PROVIDER_5005";
}

pub mod configuration {
    pub const INVALID_CONFIGURATION: &str = "CONFIG_6001";
}

/// HTTP status an API layer should use for a given code.
pub fn http_status_for(code: &str) -> u16 {
    match code {
        provider::ASSOCIATION_NOT_FOUND | provider::DOCTOR_NOT_FOUND => 404,
        provider::DUPLICATE_ASSOCIATION
        | provider::TRANSFER_INELIGIBLE
        | provider::CONCURRENT_MODIFICATION => 409,
        c if c.starts_with("VALIDATION_") => 400,
        _ => 500,
    }
}
