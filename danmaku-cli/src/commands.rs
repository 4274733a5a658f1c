use anyhow::{Context, Result, bail};
use bytes::Bytes;
use danmaku::{
    AdvancedRenderer, BlobFetcher, DecodedComments, MergeConfig, RawBlob, decode_binary,
    decode_blob, load_session, merge,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cli::{Commands, OutputArgs};
use crate::config::AppConfig;
use crate::output::{CommentReport, format_frame, write_output};
use crate::source::HttpCommentSource;

pub async fn execute(command: Commands, config: AppConfig) -> Result<()> {
    match command {
        Commands::Decode {
            inputs,
            segments,
            output,
        } => {
            let decoded = decode_files(&inputs, segments).await?;
            let report = CommentReport {
                content_id: None,
                standard: &decoded.standard,
                advanced: &decoded.advanced,
            };
            emit(&report.format(output.output)?, &output).await
        }

        Commands::Merge {
            inputs,
            segments,
            no_merge,
            batch_gap_ms,
            high_energy_slots,
            output,
        } => {
            let mut merge_config = config.engine.merge.clone();
            if no_merge {
                merge_config.enabled = false;
            }
            if let Some(gap) = batch_gap_ms {
                merge_config.batch_gap_ms = gap;
            }
            if let Some(slots) = high_energy_slots {
                merge_config.high_energy_slots = slots;
            }

            let decoded = decode_files(&inputs, segments).await?;
            let (standard, advanced) = merge_decoded(&decoded, &merge_config);
            info!(
                input = decoded.standard.len(),
                standard = standard.len(),
                advanced = advanced.len(),
                "Merged danmaku"
            );
            let report = CommentReport {
                content_id: None,
                standard: &standard,
                advanced: &advanced,
            };
            emit(&report.format(output.output)?, &output).await
        }

        Commands::Fetch {
            content_id,
            duration_ms,
            raw_url,
            segment_url,
            timeout,
            output,
        } => {
            let mut http = config.http.clone();
            if raw_url.is_some() {
                http.raw_url = raw_url;
            }
            if segment_url.is_some() {
                http.segment_url = segment_url;
            }
            if let Some(timeout) = timeout {
                http.timeout_secs = timeout;
            }
            if http.raw_url.is_none() && http.segment_url.is_none() {
                bail!("no endpoint configured: pass --raw-url/--segment-url or set [http] in the config file");
            }

            let source = Arc::new(HttpCommentSource::new(&http)?);
            let fetcher = BlobFetcher::new(source, &config.engine.fetch);
            let session = load_session(&fetcher, content_id, duration_ms, &config.engine.merge)
                .await
                .with_context(|| format!("loading danmaku for content {}", content_id))?;

            let advanced = session.advanced_events();
            let report = CommentReport {
                content_id: Some(content_id),
                standard: &session.merged.standard,
                advanced: &advanced,
            };
            emit(&report.format(output.output)?, &output).await
        }

        Commands::Frame {
            inputs,
            segments,
            at_ms,
            opacity,
            output,
        } => {
            let decoded = decode_files(&inputs, segments).await?;
            let (_, advanced) = merge_decoded(&decoded, &config.engine.merge);
            let renderer = AdvancedRenderer::new(&config.engine.renderer);
            let frame = renderer.frame(&advanced, at_ms, opacity.clamp(0.0, 1.0));
            debug!(at_ms, total = advanced.len(), visible = frame.len(), "Rendered frame");
            emit(&format_frame(at_ms, &frame, output.output)?, &output).await
        }

        Commands::Config => {
            print!("{}", config.show()?);
            Ok(())
        }
    }
}

async fn emit(content: &str, output: &OutputArgs) -> Result<()> {
    write_output(content, output.output_file.as_deref()).await
}

/// Decode every input. With `segments`, inputs are ordered binary segments
/// of one blob; otherwise each file is a blob of its own.
async fn decode_files(inputs: &[PathBuf], segments: bool) -> Result<DecodedComments> {
    let mut blobs = Vec::with_capacity(inputs.len());
    for path in inputs {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        if bytes.is_empty() {
            warn!(path = %path.display(), "Skipping empty input");
            continue;
        }
        blobs.push(Bytes::from(bytes));
    }

    let decoded = tokio::task::spawn_blocking(move || {
        if segments {
            return decode_binary(blobs.as_slice());
        }
        let mut decoded = DecodedComments::default();
        for bytes in blobs {
            decoded.extend(decode_blob(&RawBlob::from_fetched(0, bytes)));
        }
        decoded.sort();
        decoded
    })
    .await?;

    debug!(
        standard = decoded.standard.len(),
        advanced = decoded.advanced.len(),
        "Decoded inputs"
    );
    Ok(decoded)
}

fn merge_decoded(
    decoded: &DecodedComments,
    config: &MergeConfig,
) -> (Vec<danmaku::CommentEvent>, Vec<danmaku::AdvancedCommentEvent>) {
    let merged = merge(&decoded.standard, config);
    let mut advanced = merged.advanced;
    advanced.extend(decoded.advanced.iter().cloned());
    (merged.standard, advanced)
}
