//! Run with: cargo run --package server --bin generate-types --features typescript

use std::fs;
use std::path::Path;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Generating TypeScript types...");

    let out_dir = Path::new("frontend/src/types/generated");
    fs::create_dir_all(out_dir)?;

    #[cfg(feature = "typescript")]
    {
        use ts_rs::TS;

        council_core::Session::export_all_to(out_dir)?;
        council_core::SessionConfig::export_all_to(out_dir)?;
        council_core::Persona::export_all_to(out_dir)?;
        council_core::SwapMode::export_all_to(out_dir)?;
        council_core::VoteSubmission::export_all_to(out_dir)?;
        council_core::VoteOutcome::export_all_to(out_dir)?;
        council_core::LogEntry::export_all_to(out_dir)?;

        events::EventEnvelope::export_all_to(out_dir)?;
        events::Event::export_all_to(out_dir)?;
        events::StagePayload::export_all_to(out_dir)?;

        orchestrator::StartRequest::export_all_to(out_dir)?;
        orchestrator::FeedbackInput::export_all_to(out_dir)?;
        orchestrator::SessionStatusView::export_all_to(out_dir)?;
        orchestrator::ReplayReport::export_all_to(out_dir)?;

        server::routes::StartSessionResponse::export_all_to(out_dir)?;
        server::routes::SessionSummary::export_all_to(out_dir)?;
        server::routes::SwapPersonaRequest::export_all_to(out_dir)?;
        server::routes::EndSessionRequest::export_all_to(out_dir)?;
        server::routes::FinalFeedbackRequest::export_all_to(out_dir)?;
    }

    println!("TypeScript types written to {}", out_dir.display());
    Ok(())
}
