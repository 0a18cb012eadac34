pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{RepoFixture, seeded_bytes};
