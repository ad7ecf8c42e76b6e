pub mod agknow;
pub mod global_variables;
pub mod http;
