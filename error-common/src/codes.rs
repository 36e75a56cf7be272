// Error codes implementation
// Stable codes surfaced to operators and to the presentation layer

pub mod storage {
    pub const WRITE_FAILED: &str = "STORE_1001";
    pub const READ_FAILED: &str = "STORE_1002";
    pub const RECORD_NOT_FOUND: &str = "STORE_1003";
}

pub mod remote {
    pub const TRANSIENT: &str = "REMOTE_2001";
    pub const REJECTED: &str = "REMOTE_2002";
}

pub mod configuration {
    pub const INVALID: &str = "CONFIG_3001";
    pub const LOGGING: &str = "CONFIG_3002";
}

pub mod export {
    pub const WRITE_FAILED: &str = "EXPORT_4001";
}

pub mod validation {
    pub const INVALID_INPUT: &str = "VALIDATION_5001";
}

pub const INTERNAL: &str = "INTERNAL_9001";
