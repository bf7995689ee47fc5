/// Common utilities, constants, types, and components for swapcycle.
///
/// Chain access, ABI definitions, account loading, gas escalation and transaction submission
/// shared by every operation.
pub mod abi;
pub mod accounts;
pub mod alert;
pub mod chain;
pub mod constants;
pub mod execution;
pub mod gas;
pub mod utils;
