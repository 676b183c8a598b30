//! Numerical utilities: special functions, grids and Hessian uncertainties.

pub mod grid;
pub mod hessian;
pub mod special;

pub use grid::*;
pub use hessian::*;
pub use special::*;
