pub mod link;
pub mod msp;
pub mod msp_defines;
