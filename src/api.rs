pub mod opower;
