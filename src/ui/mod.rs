//! Client-facing front-ends. The only one shipped is the DAP adapter.

pub mod dap;
