/// Main library module for swapcycle.
///
/// This module exposes the primary submodules: `common` (chain access, signing, submission and
/// shared utilities) and `cycle` (operation pipelines and the account scheduler).
///
pub mod common;
pub mod cycle;
