//! Scans instrument acquisition directories, parses the files inside,
//! and prepares the metadata needed to register them in a data store.

pub mod app;
pub mod config;
pub mod descriptor;
pub mod domain;
pub mod error;
pub mod export;
mod flow;
pub mod mapper;
mod microscopy;
pub mod output;
pub mod readers;
pub mod scan;
pub mod segment;
pub mod validator;
