//! Minimal wiring demo: build a session against a real HTTP fetcher, feed
//! it a fabricated representation ladder and print the events it emits.
//!
//! ```sh
//! cargo run -p zoetrope --example playback -- https://cdn.example/content/
//! ```

use std::{env::args, error::Error, sync::Arc, time::Duration};

use tracing::{info, metadata::LevelFilter};
use tracing_subscriber::EnvFilter;
use url::Url;
use zoetrope::{
    CoreSession, PlayerCommand, PlayerOptions, Representation, RepresentationId, SegmentIndex,
    SegmentReference, TrackKind, UrlTemplate,
};
use zoetrope_net::{HttpFetcher, NetOptions};
use zoetrope_pipeline::mock::MockPlayback;
use zoetrope_sink::MemorySinkFactory;

fn representation(base: &Url, id: u32, bitrate_kbps: u64) -> Arc<Representation> {
    let seg_duration = 4.0;
    let refs = (0..150u64)
        .map(|n| SegmentReference {
            number: n,
            start: n as f64 * seg_duration,
            end: (n + 1) as f64 * seg_duration,
            template: UrlTemplate::new(base.clone(), format!("rep{id}/seg-$Number$.m4s")),
        })
        .collect();
    Arc::new(Representation {
        id: RepresentationId(id),
        kind: TrackKind::Video,
        bitrate: bitrate_kbps * 1000,
        mime_type: "video/mp4".into(),
        codecs: "avc1.64001f".into(),
        width: 1280,
        height: 720,
        frame_rate: 30.0,
        init_url: base.join(&format!("rep{id}/init.mp4")).ok(),
        index: SegmentIndex::new(refs),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::default()
                .add_directive("zoetrope=debug".parse()?)
                .add_directive("zoetrope_pipeline=debug".parse()?)
                .add_directive("zoetrope_abr=debug".parse()?)
                .add_directive(LevelFilter::INFO.into()),
        )
        .with_line_number(true)
        .with_file(true)
        .init();

    let base = args()
        .nth(1)
        .unwrap_or_else(|| "https://cdn.example/content/".to_string());
    let base: Url = base.parse()?;

    let fetcher = Arc::new(HttpFetcher::new(NetOptions::default()));
    let playback = Arc::new(MockPlayback::new());
    playback.set_duration(Some(600.0));

    let (session, handle) = CoreSession::new(
        PlayerOptions::default(),
        playback,
        fetcher,
        Box::new(MemorySinkFactory::new()),
        None,
    );

    let mut events = handle.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(?event, "core event");
        }
    });

    tokio::spawn(session.run());

    handle
        .send(PlayerCommand::RepresentationsChanged {
            video: vec![
                representation(&base, 0, 400),
                representation(&base, 1, 1000),
                representation(&base, 2, 3000),
                representation(&base, 3, 6000),
            ],
            audio: vec![],
        })
        .await?;
    handle.send(PlayerCommand::PlaybackStarted).await?;

    tokio::time::sleep(Duration::from_secs(30)).await;
    handle.send(PlayerCommand::Shutdown).await?;
    Ok(())
}
