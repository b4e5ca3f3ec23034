//! Testing utilities and mock implementations for E2E tests.
//!
//! Provides a scripted [`MockExtractor`] so the orchestrator can be tested
//! without yt-dlp or the network.

mod mock_extractor;

pub use mock_extractor::{FetchPlan, FetchResult, MockExtractor, MockProbe};
