pub mod decision;
pub mod thesis;
