//! # Image Harvest
//!
//! Batch jobs that harvest coded images from a render endpoint, keep them on
//! range-named branches, and load the discovered URLs into a metadata store.
//!
//! Jobs share no process state. They are composed only through naming
//! conventions: image codes (`s89120`), branch names ending
//! `<start>_to_<end>`, intake folders named `images_*`, and flat log files.
//!
//! ## Pipeline
//!
//! ```text
//! ┌─────────┐  ┌─────────┐        ┌──────────┐   ┌──────────┐
//! │  fetch  │  │  scan   │        │ organize │   │  locate  │
//! │ images_ │  │ codes → │        │ intake → │   │ branches │
//! │ folder  │  │  log    │        │ ranges   │   │ → URLs   │
//! └────┬────┘  └─────────┘        └────▲─────┘   └────┬─────┘
//!      └──────── intake folders ───────┘              │
//!                                  branch ranges ─────┤
//!                                                     ▼
//!                                               ┌──────────┐
//!                                               │   load   │
//!                                               │  SQLite  │
//!                                               └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration |
//! | [`models`] | Image codes, range records, stored rows |
//! | [`remote`] | Render-endpoint client |
//! | [`fetch`] | Download and validate a code range |
//! | [`scan`] | Probe a code range, log valid codes |
//! | [`branches`] | Branch listing → range index |
//! | [`locate`] | Find in-range images on branches |
//! | [`organize`] | Re-file intake images by range |
//! | [`load`] | Upsert image URLs into the store |
//! | [`stats`] | Store summary |
//! | [`retry`] | Randomized retry policy |
//! | [`runlog`] | Append-only run logs |
//! | [`db`] | Store connection |
//! | [`migrate`] | Store schema |

pub mod branches;
pub mod config;
pub mod db;
pub mod fetch;
pub mod load;
pub mod locate;
pub mod migrate;
pub mod models;
pub mod organize;
pub mod remote;
pub mod retry;
pub mod runlog;
pub mod scan;
pub mod stats;
