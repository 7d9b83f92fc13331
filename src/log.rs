//! Logging facade, routes to `defmt` when enabled and `log` otherwise

#[cfg(not(feature = "defmt"))]
#[allow(unused_imports)]
pub(crate) use ::log::{trace, debug, info, warn, error};

#[cfg(feature = "defmt")]
#[allow(unused_imports)]
pub(crate) use ::defmt::{trace, debug, info, warn, error};
