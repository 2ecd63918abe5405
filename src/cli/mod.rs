pub mod config_check;
pub mod hash;
pub mod run;
pub mod verdict;
