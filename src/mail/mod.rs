pub mod decoders;
pub mod identity;
