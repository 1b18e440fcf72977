use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

use crate::geocoding::Geocoder;
use crate::models::{Coordinates, Event, EventType};

pub const PAST_COLOR: &str = "#9ca3af";
pub const DEFAULT_COLOR: &str = "#6b7280";
pub const FIT_PADDING_PX: u32 = 50;

pub type MarkerId = u64;

#[derive(Debug, Error)]
pub enum MapError {
    #[error("map library unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerSpec {
    pub event_id: String,
    pub title: String,
    pub coordinates: Coordinates,
    pub color: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl Bounds {
    pub fn around<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = Coordinates>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let start = Bounds {
            south: first.latitude,
            west: first.longitude,
            north: first.latitude,
            east: first.longitude,
        };
        Some(iter.fold(start, |b, p| Bounds {
            south: b.south.min(p.latitude),
            west: b.west.min(p.longitude),
            north: b.north.max(p.latitude),
            east: b.east.max(p.longitude),
        }))
    }
}

/// The map widget as seen from the marker layer.
pub trait MapSurface {
    fn add_marker(&mut self, spec: &MarkerSpec) -> MarkerId;
    fn remove_marker(&mut self, id: MarkerId);
    fn fit_bounds(&mut self, bounds: Bounds, padding_px: u32);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Popup {
    pub event_id: String,
    pub title: String,
    pub date: String,
    pub location: String,
    pub distances: String,
    pub category: String,
}

impl Popup {
    pub fn for_event(event: &Event) -> Self {
        Self {
            event_id: event.id.clone(),
            title: event.title.clone(),
            date: event.display_date(),
            location: event.location.clone(),
            distances: event.distance_labels(),
            category: event.category_label().to_string(),
        }
    }
}

pub fn color_for(event: &Event, today: NaiveDate) -> &'static str {
    if event.is_past(today) {
        return PAST_COLOR;
    }
    type_color(event.event_type)
}

pub fn type_color(kind: Option<EventType>) -> &'static str {
    match kind {
        Some(EventType::OfficialRace) => "#ef4444",
        Some(EventType::TrainingRun) => "#3b82f6",
        Some(EventType::CharityEvent) => "#10b981",
        Some(EventType::VirtualRun) => "#8b5cf6",
        Some(EventType::TrailRun) => "#f59e0b",
        None => DEFAULT_COLOR,
    }
}

struct Placed {
    id: MarkerId,
    popup: Popup,
}

/// Markers currently on the map. Every render replaces the whole set.
#[derive(Default)]
pub struct MarkerLayer {
    placed: Vec<Placed>,
    open: Option<Popup>,
}

impl MarkerLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.placed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placed.is_empty()
    }

    pub fn marker_ids(&self) -> Vec<MarkerId> {
        self.placed.iter().map(|p| p.id).collect()
    }

    pub fn clear<S: MapSurface>(&mut self, surface: &mut S) {
        for placed in self.placed.drain(..) {
            surface.remove_marker(placed.id);
        }
        self.open = None;
    }

    /// Resolves coordinates for every event, then places them.
    pub async fn render<S: MapSurface>(
        &mut self,
        surface: &mut S,
        events: &[Event],
        geocoder: &Geocoder,
        today: NaiveDate,
    ) -> usize {
        let resolved = geocoder.resolve_all(events).await;
        let placements: Vec<(&Event, Coordinates)> = events
            .iter()
            .zip(resolved)
            .map(|(event, r)| (event, r.resolution.coordinates))
            .collect();
        self.place(surface, &placements, today)
    }

    /// Places one marker per entry, in order, and fits the viewport.
    pub fn place<S: MapSurface>(
        &mut self,
        surface: &mut S,
        placements: &[(&Event, Coordinates)],
        today: NaiveDate,
    ) -> usize {
        self.clear(surface);

        for (event, coordinates) in placements {
            let spec = MarkerSpec {
                event_id: event.id.clone(),
                title: event.title.clone(),
                coordinates: *coordinates,
                color: color_for(event, today),
            };
            let id = surface.add_marker(&spec);
            self.placed.push(Placed {
                id,
                popup: Popup::for_event(event),
            });
        }

        if let Some(bounds) = Bounds::around(placements.iter().map(|(_, c)| *c)) {
            surface.fit_bounds(bounds, FIT_PADDING_PX);
        }

        tracing::debug!(markers = self.placed.len(), "markers placed");
        self.placed.len()
    }

    /// Marker click.
    pub fn open(&mut self, marker: MarkerId) -> Option<&Popup> {
        let popup = self
            .placed
            .iter()
            .find(|p| p.id == marker)
            .map(|p| p.popup.clone())?;
        self.open = Some(popup);
        self.open.as_ref()
    }

    pub fn open_popup(&self) -> Option<&Popup> {
        self.open.as_ref()
    }

    /// The popup's details action: hands the event id to `on_details` and
    /// closes the popup.
    pub fn show_details<F>(&mut self, on_details: F) -> bool
    where
        F: FnOnce(&str),
    {
        match self.open.take() {
            Some(popup) => {
                on_details(&popup.event_id);
                true
            }
            None => false,
        }
    }
}

/// A map view stays `Loading` for good when its widget fails to start.
pub enum MapView<S: MapSurface> {
    Loading,
    Ready { surface: S, layer: MarkerLayer },
}

impl<S: MapSurface> MapView<S> {
    pub fn initialize(widget: Result<S, MapError>) -> Self {
        match widget {
            Ok(surface) => MapView::Ready {
                surface,
                layer: MarkerLayer::new(),
            },
            Err(err) => {
                tracing::error!(error = %err, "map failed to initialize");
                MapView::Loading
            }
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, MapView::Loading)
    }

    pub async fn render(&mut self, events: &[Event], geocoder: &Geocoder, today: NaiveDate) -> usize {
        match self {
            MapView::Loading => 0,
            MapView::Ready { surface, layer } => layer.render(surface, events, geocoder, today).await,
        }
    }

    pub fn layer_mut(&mut self) -> Option<&mut MarkerLayer> {
        match self {
            MapView::Loading => None,
            MapView::Ready { layer, .. } => Some(layer),
        }
    }
}
