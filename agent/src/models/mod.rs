pub mod interaction;
pub mod record;
