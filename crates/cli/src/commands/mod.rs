pub mod migrate;
pub mod new;
pub mod status;
