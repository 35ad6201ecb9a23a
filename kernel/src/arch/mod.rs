/// Architecture support. Only x86_64 is targeted.
pub mod x86_64;
