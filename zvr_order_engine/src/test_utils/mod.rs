//! Helpers shared by the unit tests, the integration tests and the server tests: throwaway databases, scripted
//! gateways and seed data.
pub mod mocks;
pub mod prepare_env;
pub mod seeds;
