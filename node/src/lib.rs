//! This crate implements the RippleJudge node: the submission lifecycle
//! engine of an online judge.
//!
//! A node accepts submissions into a priority queue, grades them on a pool
//! of worker threads through the `grading` crate, persists the outcomes in
//! sqlite and publishes lifecycle events. A maintenance daemon reclaims
//! work abandoned by crashed workers and purges expired artifacts.
//!

extern crate log;
extern crate error_chain;
extern crate rand;
extern crate serde;
extern crate serde_json;
extern crate serde_yaml;
extern crate sqlite;
extern crate uuid;

extern crate grading;

pub mod catalog;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod entities;
pub mod events;
pub mod hostrun;
pub mod init;
pub mod maintenance;
pub mod storage;
pub mod submit;
pub mod utils;

error_chain::error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    links {
        ConfigError(config::Error, config::ErrorKind);
        DispatchError(dispatch::Error, dispatch::ErrorKind);
        InitError(init::Error, init::ErrorKind);
        SubmitError(submit::Error, submit::ErrorKind);
    }

    foreign_links {
        IoError(::std::io::Error);
    }
}
