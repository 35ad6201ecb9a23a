#![cfg_attr(not(test), no_std)]
#![allow(dead_code)]

// Hardware-dependent modules, only compiled for kernel target, not host-target tests
#[cfg(not(test))]
pub mod arch;

pub mod drivers;
pub mod mem;
pub mod net;
pub mod time;
