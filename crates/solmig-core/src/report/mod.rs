pub mod aggregate;
pub mod consistency;
