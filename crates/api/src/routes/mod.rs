pub mod status;
pub mod transcribe;
