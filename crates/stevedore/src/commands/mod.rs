pub mod create;
pub mod internal;
pub mod kill;
pub mod restart;
pub mod rm;
pub mod run;
pub mod stop;
pub mod volume;
