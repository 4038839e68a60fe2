pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod filter;
pub mod fs_util;
pub mod index;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod rcsb;
pub mod record;
pub mod reference;
pub mod resolver;
pub mod retry;
pub mod sink;
pub mod stream;
