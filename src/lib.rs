// Motor motion library: two controller families behind one capability set,
// a homing/finding/jog state machine, and a scheduler command wrapper

pub mod command;
pub mod config;
pub mod messages;
pub mod motor;
pub mod runtime;
pub mod timer;
