//! Deer-density overlay state for the map view.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;

use crate::model_manager::ModelManager;
use crate::models::{DeerDensity, MapBounds, Provider};
use crate::workers::Debouncer;

pub const VIEWPORT_IDLE_DELAY: Duration = Duration::from_secs(1);

/// Viewport edges rounded to 1e-5 degrees (about a metre).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ViewportKey {
    north: i64,
    south: i64,
    east: i64,
    west: i64,
}

impl From<&MapBounds> for ViewportKey {
    fn from(bounds: &MapBounds) -> Self {
        let q = |v: f64| (v * 1e5).round() as i64;
        Self {
            north: q(bounds.north),
            south: q(bounds.south),
            east: q(bounds.east),
            west: q(bounds.west),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeerLayerView {
    pub visible: bool,
    pub loading: bool,
    pub provider: Provider,
    pub data: DeerDensity,
}

struct LayerState {
    provider: Provider,
    visible: bool,
    /// Fetches started and not yet finished.
    in_flight: usize,
    viewport: Option<MapBounds>,
    current: DeerDensity,
    cache: HashMap<(Provider, ViewportKey), DeerDensity>,
}

pub struct DeerLayer {
    models: Arc<ModelManager>,
    debouncer: Debouncer,
    state: Mutex<LayerState>,
}

impl DeerLayer {
    pub fn new(models: Arc<ModelManager>, provider: Provider) -> Arc<Self> {
        Self::with_delay(models, provider, VIEWPORT_IDLE_DELAY)
    }

    pub fn with_delay(models: Arc<ModelManager>, provider: Provider, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            models,
            debouncer: Debouncer::new(delay),
            state: Mutex::new(LayerState {
                provider,
                visible: false,
                in_flight: 0,
                viewport: None,
                current: DeerDensity::empty(),
                cache: HashMap::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LayerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn is_visible(&self) -> bool {
        self.lock().visible
    }

    pub fn current(&self) -> DeerDensity {
        self.lock().current.clone()
    }

    pub fn view(&self) -> DeerLayerView {
        let state = self.lock();
        DeerLayerView {
            visible: state.visible,
            loading: state.in_flight > 0,
            provider: state.provider,
            data: state.current.clone(),
        }
    }

    /// Follow the active chat provider. Datasets from any other provider are
    /// dropped so they are never shown again.
    pub fn set_provider(&self, provider: Provider) {
        let mut state = self.lock();
        if state.provider == provider {
            return;
        }
        state.provider = provider;
        state.cache.retain(|(owner, _), _| *owner == provider);
        state.current = DeerDensity::empty();
    }

    /// Show or hide the overlay. Turning it on fetches the known viewport
    /// right away; turning it off cancels any pending fetch.
    pub async fn toggle_visibility(&self) -> bool {
        let (visible, viewport) = {
            let mut state = self.lock();
            state.visible = !state.visible;
            (state.visible, state.viewport)
        };
        if !visible {
            self.debouncer.cancel();
        } else if let Some(bounds) = viewport {
            self.refresh(bounds).await;
        }
        visible
    }

    /// The map stopped moving. Fetch after the idle delay unless it moves
    /// again first.
    pub fn on_viewport_idle(self: &Arc<Self>, bounds: MapBounds) {
        let visible = {
            let mut state = self.lock();
            state.viewport = Some(bounds);
            state.visible
        };
        if !visible {
            return;
        }
        let layer = Arc::clone(self);
        self.debouncer.schedule(async move {
            layer.refresh(bounds).await;
        });
    }

    /// Load the dataset for `bounds`, from cache when possible.
    pub async fn refresh(&self, bounds: MapBounds) -> DeerDensity {
        let key = ViewportKey::from(&bounds);
        let provider = {
            let mut state = self.lock();
            state.viewport = Some(bounds);
            if let Some(cached) = state.cache.get(&(state.provider, key)).cloned() {
                state.current = cached.clone();
                return cached;
            }
            state.in_flight += 1;
            state.provider
        };

        let data = self.models.deer_density(&bounds, provider).await;

        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.provider != provider {
            return data;
        }
        if !data.is_empty() {
            state.cache.insert((provider, key), data.clone());
        }
        if state.viewport.as_ref().map(ViewportKey::from) == Some(key) {
            state.current = data.clone();
        }
        data
    }
}
