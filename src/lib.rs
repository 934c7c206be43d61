pub mod alerts;
pub mod application_state;
pub mod capture;
pub mod cli;
pub mod config;
pub mod consts;
pub mod exporters;
pub mod flow;
pub mod hub;
pub mod settings;
pub mod storage;
