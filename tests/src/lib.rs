//! # Wallet Bridge Test Suite
//!
//! End-to-end scenarios that cross crate boundaries: a page client talking
//! through a content relay to the background host, popup conversations, and
//! shared storage seen from several contexts.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── flows.rs            # page → relay → host request flows
//!     └── e2e_choreography.rs # popups, tab lifecycle, shared storage
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p bridge-tests
//! cargo test -p bridge-tests integration::flows
//! ```

#![allow(unused_variables)]
#![allow(unused_imports)]
#![allow(dead_code)]

pub mod integration;
