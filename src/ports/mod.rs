//! Full project ports for specific targets. They mainly
//! provide the board constants and a method to construct a
//! generic bootloader from specific parts.

pub mod da1468x;
