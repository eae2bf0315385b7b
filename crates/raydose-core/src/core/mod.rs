pub mod clinical;
pub mod machine;
pub mod metrics;
pub mod models;
