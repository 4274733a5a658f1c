//! Render controller behavior against in-memory collaborators.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use danmaku::{
    BlobFetcher, CommentEvent, CommentSource, ControllerHandle, ControllerState,
    DanmakuError, DiscontinuityReason, EngineConfig, ListenerId, LoadOutcome, MediaPlayer,
    PlayerListener, RenderController, RenderSurface, Result, StyleSettings,
};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Prepare,
    Add(String, i64),
    Start,
    Seek(i64),
    Pause,
    Resume,
    Show,
    Hide,
    Clear,
    Release,
    Style,
    Speed(f32),
}

#[derive(Default)]
struct MockSurface {
    calls: Mutex<Vec<Call>>,
    prepared: AtomicBool,
}

impl MockSurface {
    fn new(prepared: bool) -> Arc<Self> {
        let surface = Self::default();
        surface.prepared.store(prepared, Ordering::SeqCst);
        Arc::new(surface)
    }

    fn set_prepared(&self) {
        self.prepared.store(true, Ordering::SeqCst);
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn count(&self, call: &Call) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    /// Every text ever added, across clears.
    fn all_texts(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::Add(text, _) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Texts currently queued on the surface.
    fn texts(&self) -> Vec<String> {
        let mut texts = Vec::new();
        for call in self.calls.lock().iter() {
            match call {
                Call::Clear => texts.clear(),
                Call::Add(text, _) => texts.push(text.clone()),
                _ => {}
            }
        }
        texts
    }

    fn push(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

impl RenderSurface for MockSurface {
    fn prepare(&self) {
        self.push(Call::Prepare);
    }

    fn is_prepared(&self) -> bool {
        self.prepared.load(Ordering::SeqCst)
    }

    fn add_event(&self, event: &CommentEvent) {
        self.push(Call::Add(event.text.clone(), event.show_at_ms));
    }

    fn start(&self) {
        self.push(Call::Start);
    }

    fn seek_to(&self, position_ms: i64) {
        self.push(Call::Seek(position_ms));
    }

    fn pause(&self) {
        self.push(Call::Pause);
    }

    fn resume(&self) {
        self.push(Call::Resume);
    }

    fn show(&self) {
        self.push(Call::Show);
    }

    fn hide(&self) {
        self.push(Call::Hide);
    }

    fn clear(&self) {
        self.push(Call::Clear);
    }

    fn release(&self) {
        self.push(Call::Release);
    }

    fn apply_style(&self, _style: &StyleSettings) {
        self.push(Call::Style);
    }

    fn set_playback_speed(&self, speed: f32) {
        self.push(Call::Speed(speed));
    }
}

#[derive(Default)]
struct MockPlayer {
    position: AtomicI64,
    playing: AtomicBool,
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn PlayerListener>)>>,
}

impl MockPlayer {
    fn new(position: i64, playing: bool) -> Arc<Self> {
        let player = Self::default();
        player.position.store(position, Ordering::SeqCst);
        player.playing.store(playing, Ordering::SeqCst);
        Arc::new(player)
    }

    fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    fn listeners(&self) -> Vec<Arc<dyn PlayerListener>> {
        self.listeners.lock().iter().map(|(_, l)| l.clone()).collect()
    }

    fn seek(&self, new_ms: i64) {
        let old_ms = self.position.swap(new_ms, Ordering::SeqCst);
        for listener in self.listeners() {
            listener.on_position_discontinuity(old_ms, new_ms, DiscontinuityReason::Seek);
        }
    }

    fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::SeqCst);
        for listener in self.listeners() {
            listener.on_is_playing_changed(playing);
        }
    }

    fn set_speed(&self, speed: f32) {
        for listener in self.listeners() {
            listener.on_playback_speed_changed(speed);
        }
    }
}

impl MediaPlayer for MockPlayer {
    fn current_position_ms(&self) -> i64 {
        self.position.load(Ordering::SeqCst)
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    fn add_listener(&self, listener: Arc<dyn PlayerListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.lock().push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.lock().retain(|(l, _)| *l != id);
    }
}

/// Serves one XML blob per content id. Ids in `gated` block until a permit
/// is added to `gate`.
struct MockSource {
    blobs: HashMap<i64, String>,
    gated: Vec<i64>,
    gate: Semaphore,
    raw_calls: AtomicUsize,
}

impl Default for MockSource {
    fn default() -> Self {
        Self {
            blobs: HashMap::new(),
            gated: Vec::new(),
            gate: Semaphore::new(0),
            raw_calls: AtomicUsize::new(0),
        }
    }
}

impl MockSource {
    fn with_blobs(blobs: &[(i64, &str, usize)]) -> Self {
        Self {
            blobs: blobs
                .iter()
                .map(|(id, text, n)| (*id, xml(text, *n)))
                .collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl CommentSource for MockSource {
    async fn fetch_raw_comment_blob(&self, content_id: i64) -> Result<Bytes> {
        self.raw_calls.fetch_add(1, Ordering::SeqCst);
        if self.gated.contains(&content_id) {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| DanmakuError::transport(e.to_string()))?;
        }
        match self.blobs.get(&content_id) {
            Some(blob) => Ok(Bytes::from(blob.clone())),
            None => Err(DanmakuError::transport("404")),
        }
    }

    async fn fetch_comment_segment(&self, _content_id: i64, _index: u32) -> Result<Bytes> {
        Err(DanmakuError::transport("segments unsupported"))
    }
}

/// `n` comments with `text`, 100ms apart. Three or more form a burst.
fn xml(text: &str, n: usize) -> String {
    let mut out = String::from("<i>");
    for i in 0..n {
        out.push_str(&format!(
            "<d p=\"{}.{},1,25,16777215\">{}</d>",
            i / 10,
            i % 10,
            text
        ));
    }
    out.push_str("</i>");
    out
}

fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.controller.ready_poll_interval_ms = 5;
    config.controller.ready_poll_max_attempts = 200;
    config
}

struct Harness {
    handle: ControllerHandle,
    fetcher: Arc<BlobFetcher>,
    source: Arc<MockSource>,
}

fn spawn(source: MockSource, config: EngineConfig) -> Harness {
    let source = Arc::new(source);
    let fetcher = Arc::new(BlobFetcher::new(source.clone(), &config.fetch));
    let handle = RenderController::spawn(fetcher.clone(), config);
    Harness {
        handle,
        fetcher,
        source,
    }
}

async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn wait_for_state(handle: &ControllerHandle, expected: ControllerState) {
    for _ in 0..300 {
        if handle.snapshot().await.unwrap().state == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("controller never reached {:?}", expected);
}

#[tokio::test]
async fn test_load_injects_and_syncs_to_player() {
    let h = spawn(MockSource::with_blobs(&[(1, "a", 2)]), test_config());
    let surface = MockSurface::new(true);
    let player = MockPlayer::new(1000, true);

    h.handle.bind_player(player.clone()).await.unwrap();
    h.handle.attach_surface(surface.clone()).await.unwrap();
    assert_eq!(h.handle.load(1, 0).await.unwrap(), LoadOutcome::Started);

    wait_for_state(&h.handle, ControllerState::Ready { content_id: 1 }).await;
    assert_eq!(surface.texts(), vec!["a", "a"]);

    let calls = surface.calls();
    assert_eq!(
        calls[calls.len() - 4..],
        [Call::Start, Call::Seek(1000), Call::Resume, Call::Show]
    );
    assert_eq!(player.listener_count(), 1);
}

#[tokio::test]
async fn test_injection_waits_for_prepared_surface() {
    let h = spawn(MockSource::with_blobs(&[(1, "a", 2)]), test_config());
    let surface = MockSurface::new(false);

    h.handle.attach_surface(surface.clone()).await.unwrap();
    h.handle.load(1, 0).await.unwrap();

    wait_for_state(&h.handle, ControllerState::Attached { view_ready: false }).await;
    assert!(surface.texts().is_empty());

    // Picked up by polling, no explicit signal.
    surface.set_prepared();
    eventually(|| surface.texts().len() == 2).await;
    wait_for_state(&h.handle, ControllerState::Ready { content_id: 1 }).await;
}

#[tokio::test]
async fn test_ready_timeout_keeps_events_cached() {
    let mut config = test_config();
    config.controller.ready_poll_max_attempts = 3;
    let h = spawn(MockSource::with_blobs(&[(1, "a", 2)]), config);
    let surface = MockSurface::new(false);

    let generation = h.handle.attach_surface(surface.clone()).await.unwrap();
    h.handle.load(1, 0).await.unwrap();
    eventually(|| h.source.raw_calls.load(Ordering::SeqCst) == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ControllerState::Attached { view_ready: false });
    assert_eq!(snapshot.standard_count, 2);
    assert!(surface.texts().is_empty());

    // A late prepared signal still injects the cached events.
    h.handle.surface_prepared(generation).await.unwrap();
    wait_for_state(&h.handle, ControllerState::Ready { content_id: 1 }).await;
    assert_eq!(surface.texts().len(), 2);
}

#[tokio::test]
async fn test_stale_load_never_reaches_surface() {
    let mut source = MockSource::with_blobs(&[(1, "one", 3), (2, "two", 2)]);
    source.gated = vec![1];
    let h = spawn(source, test_config());
    let surface = MockSurface::new(true);
    h.handle.attach_surface(surface.clone()).await.unwrap();

    assert_eq!(h.handle.load(1, 0).await.unwrap(), LoadOutcome::Started);
    eventually(|| h.source.raw_calls.load(Ordering::SeqCst) == 1).await;
    assert_eq!(h.handle.load(2, 0).await.unwrap(), LoadOutcome::Started);

    wait_for_state(&h.handle, ControllerState::Ready { content_id: 2 }).await;
    h.source.gate.add_permits(1);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(surface.all_texts().iter().all(|t| t == "two"));
    assert_eq!(surface.texts(), vec!["two", "two"]);
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.content_id, Some(2));
    assert_eq!(snapshot.epoch, 2);
}

#[tokio::test]
async fn test_reentrant_load_rejected() {
    let mut source = MockSource::with_blobs(&[(1, "one", 1)]);
    source.gated = vec![1];
    let h = spawn(source, test_config());

    assert_eq!(h.handle.load(1, 0).await.unwrap(), LoadOutcome::Started);
    assert_eq!(h.handle.load(1, 0).await.unwrap(), LoadOutcome::AlreadyLoading);
    assert!(h.handle.snapshot().await.unwrap().is_loading);

    h.source.gate.add_permits(1);
    eventually(|| h.fetcher.raw_cache().len() == 1).await;
    assert_eq!(h.source.raw_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rebind_reuses_cached_events() {
    let h = spawn(MockSource::with_blobs(&[(1, "a", 2)]), test_config());
    let first = MockSurface::new(true);

    h.handle.attach_surface(first.clone()).await.unwrap();
    h.handle.load(1, 0).await.unwrap();
    wait_for_state(&h.handle, ControllerState::Ready { content_id: 1 }).await;

    h.handle.detach_surface().await.unwrap();
    wait_for_state(&h.handle, ControllerState::Detached).await;
    assert_eq!(first.count(&Call::Release), 0);
    assert_eq!(first.calls()[first.calls().len() - 2..], [Call::Pause, Call::Hide]);

    let second = MockSurface::new(true);
    h.handle.attach_surface(second.clone()).await.unwrap();
    assert_eq!(h.handle.load(1, 0).await.unwrap(), LoadOutcome::Cached);
    wait_for_state(&h.handle, ControllerState::Ready { content_id: 1 }).await;
    assert_eq!(second.texts(), vec!["a", "a"]);
    assert_eq!(h.source.raw_calls.load(Ordering::SeqCst), 1);

    // Replacing a bound surface releases the old one.
    let third = MockSurface::new(true);
    h.handle.attach_surface(third.clone()).await.unwrap();
    wait_for_state(&h.handle, ControllerState::Ready { content_id: 1 }).await;
    assert_eq!(second.count(&Call::Release), 1);
    assert_eq!(third.texts().len(), 2);
}

#[tokio::test]
async fn test_attach_same_surface_is_noop() {
    let h = spawn(MockSource::default(), test_config());
    let surface = MockSurface::new(false);

    let first = h.handle.attach_surface(surface.clone()).await.unwrap();
    let again = h.handle.attach_surface(surface.clone()).await.unwrap();

    assert_eq!(first, again);
    assert_eq!(surface.count(&Call::Prepare), 1);
    assert_eq!(surface.count(&Call::Release), 0);
}

#[tokio::test]
async fn test_prepared_signal_from_replaced_surface_ignored() {
    let h = spawn(MockSource::with_blobs(&[(1, "a", 2)]), test_config());
    let old = MockSurface::new(false);
    let new = MockSurface::new(false);

    let old_generation = h.handle.attach_surface(old.clone()).await.unwrap();
    let new_generation = h.handle.attach_surface(new.clone()).await.unwrap();
    assert_ne!(old_generation, new_generation);

    // The replaced surface reports ready after the swap.
    h.handle.surface_prepared(old_generation).await.unwrap();
    h.handle.load(1, 0).await.unwrap();
    eventually(|| h.fetcher.raw_cache().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ControllerState::Attached { view_ready: false });
    assert_eq!(snapshot.standard_count, 2);
    assert!(new.all_texts().is_empty());
    assert!(old.all_texts().is_empty());

    h.handle.surface_prepared(new_generation).await.unwrap();
    wait_for_state(&h.handle, ControllerState::Ready { content_id: 1 }).await;
    assert_eq!(new.texts(), vec!["a", "a"]);
    assert!(old.all_texts().is_empty());
}

#[tokio::test]
async fn test_prepared_signal_after_detach_ignored() {
    let h = spawn(MockSource::with_blobs(&[(1, "a", 2)]), test_config());
    let first = MockSurface::new(false);

    let stale = h.handle.attach_surface(first.clone()).await.unwrap();
    h.handle.detach_surface().await.unwrap();
    h.handle.surface_prepared(stale).await.unwrap();

    // Re-attaching the same surface is a new attachment.
    let current = h.handle.attach_surface(first.clone()).await.unwrap();
    assert_ne!(stale, current);
    h.handle.surface_prepared(stale).await.unwrap();
    h.handle.load(1, 0).await.unwrap();
    eventually(|| h.fetcher.raw_cache().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(first.all_texts().is_empty());

    h.handle.surface_prepared(current).await.unwrap();
    wait_for_state(&h.handle, ControllerState::Ready { content_id: 1 }).await;
    assert_eq!(first.texts().len(), 2);
}

#[tokio::test]
async fn test_seek_resyncs_surface_clock() {
    let h = spawn(MockSource::with_blobs(&[(1, "a", 2)]), test_config());
    let surface = MockSurface::new(true);
    let player = MockPlayer::new(0, true);

    h.handle.bind_player(player.clone()).await.unwrap();
    h.handle.attach_surface(surface.clone()).await.unwrap();
    h.handle.load(1, 0).await.unwrap();
    wait_for_state(&h.handle, ControllerState::Ready { content_id: 1 }).await;

    player.seek(5000);
    eventually(|| surface.count(&Call::Seek(5000)) == 1).await;

    player.set_playing(false);
    eventually(|| surface.calls().last() == Some(&Call::Pause)).await;

    player.set_speed(2.0);
    eventually(|| surface.count(&Call::Speed(2.0)) == 1).await;
}

#[tokio::test]
async fn test_disable_hides_and_enable_resyncs() {
    let h = spawn(MockSource::with_blobs(&[(1, "a", 2)]), test_config());
    let surface = MockSurface::new(true);
    let player = MockPlayer::new(2000, true);

    h.handle.bind_player(player.clone()).await.unwrap();
    h.handle.attach_surface(surface.clone()).await.unwrap();
    h.handle.load(1, 0).await.unwrap();
    wait_for_state(&h.handle, ControllerState::Ready { content_id: 1 }).await;

    h.handle.set_enabled(false).await.unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    assert!(!snapshot.enabled);
    assert_eq!(surface.calls().last(), Some(&Call::Hide));
    assert!(!h.handle.advanced_layer().is_visible());

    // Ignored while hidden.
    player.seek(7000);
    h.handle.snapshot().await.unwrap();
    assert_eq!(surface.count(&Call::Seek(7000)), 0);

    h.handle.set_enabled(true).await.unwrap();
    h.handle.snapshot().await.unwrap();
    let calls = surface.calls();
    assert_eq!(calls[calls.len() - 3..], [Call::Seek(7000), Call::Resume, Call::Show]);
    assert_eq!(surface.texts().len(), 2);
}

#[tokio::test]
async fn test_merge_toggle_rederives_from_cache() {
    let h = spawn(MockSource::with_blobs(&[(1, "X", 3)]), test_config());
    let surface = MockSurface::new(true);

    h.handle.attach_surface(surface.clone()).await.unwrap();
    h.handle.load(1, 0).await.unwrap();
    wait_for_state(&h.handle, ControllerState::Ready { content_id: 1 }).await;

    // One repetitive group, promoted to the advanced layer.
    let layer = h.handle.advanced_layer();
    assert!(surface.texts().is_empty());
    assert_eq!(layer.len(), 1);
    assert_eq!(layer.frame(0)[0].text, "X ×1");

    h.handle
        .update_style_settings(StyleSettings {
            merge_duplicates_enabled: false,
            opacity: 0.5,
            ..Default::default()
        })
        .await
        .unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.standard_count, 3);
    assert_eq!(snapshot.advanced_count, 0);
    assert_eq!(surface.texts(), vec!["X", "X", "X"]);
    assert!(layer.is_empty());
    assert_eq!(layer.opacity(), 0.5);
    assert_eq!(h.source.raw_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_load_failure_shows_nothing() {
    let h = spawn(MockSource::default(), test_config());
    let surface = MockSurface::new(true);

    h.handle.attach_surface(surface.clone()).await.unwrap();
    h.handle.load(99, 0).await.unwrap();
    eventually(|| h.source.raw_calls.load(Ordering::SeqCst) == 1).await;
    wait_for_state(&h.handle, ControllerState::Attached { view_ready: true }).await;

    let snapshot = h.handle.snapshot().await.unwrap();
    assert!(!snapshot.is_loading);
    assert_eq!(snapshot.standard_count, 0);
    assert!(surface.all_texts().is_empty());

    // A later load for the same id retries.
    h.handle.load(99, 0).await.unwrap();
    eventually(|| h.source.raw_calls.load(Ordering::SeqCst) == 2).await;
}

#[tokio::test]
async fn test_release_all_drops_everything() {
    let h = spawn(MockSource::with_blobs(&[(1, "a", 2)]), test_config());
    let surface = MockSurface::new(true);
    let player = MockPlayer::new(0, false);

    h.handle.bind_player(player.clone()).await.unwrap();
    h.handle.attach_surface(surface.clone()).await.unwrap();
    h.handle.load(1, 0).await.unwrap();
    wait_for_state(&h.handle, ControllerState::Ready { content_id: 1 }).await;

    h.handle.release_all().await.unwrap();

    assert_eq!(surface.count(&Call::Release), 1);
    assert_eq!(player.listener_count(), 0);
    assert!(h.fetcher.raw_cache().is_empty());
    assert!(h.handle.advanced_layer().is_empty());

    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ControllerState::Detached);
    assert_eq!(snapshot.content_id, None);
    assert_eq!(snapshot.standard_count, 0);

    // Nothing cached anymore: the same id is fetched again.
    assert_eq!(h.handle.load(1, 0).await.unwrap(), LoadOutcome::Started);
    eventually(|| h.source.raw_calls.load(Ordering::SeqCst) == 2).await;
}

#[tokio::test]
async fn test_dropping_handles_stops_controller() {
    let h = spawn(MockSource::default(), test_config());
    let player = MockPlayer::new(0, false);
    h.handle.bind_player(player.clone()).await.unwrap();
    h.handle.snapshot().await.unwrap();
    assert_eq!(player.listener_count(), 1);

    drop(h.handle);
    eventually(|| player.listener_count() == 0).await;
}

#[tokio::test]
async fn test_shutdown() {
    let h = spawn(MockSource::default(), test_config());
    let surface = MockSurface::new(true);
    h.handle.attach_surface(surface.clone()).await.unwrap();

    h.handle.shutdown().await;
    eventually(|| surface.count(&Call::Release) == 1).await;
    eventually(|| h.handle.is_closed()).await;
    assert!(matches!(
        h.handle.snapshot().await,
        Err(DanmakuError::ControllerStopped)
    ));
}
