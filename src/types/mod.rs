pub mod near;
pub mod vrf;
pub mod webauthn;

pub use near::*;
pub use vrf::*;
