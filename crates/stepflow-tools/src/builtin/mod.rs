pub mod bash;
pub mod echo;
pub mod sleep;
