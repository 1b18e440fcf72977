use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};

use race_events::auth::SignUpProfile;
use race_events::config::ViewMode;
use race_events::filter::{self, BUCKET_KEYS};
use race_events::geocoding::{current_position, StaticPositionSource};
use race_events::markers::{Bounds, MapSurface, MarkerId, MarkerLayer, MarkerSpec};
use race_events::service::{EventView, Notice};
use race_events::settings::Settings;
use race_events::{App, Coordinates, EventDate, EventType, FilterCriteria, NewEvent};

#[derive(Parser, Debug)]
#[command(name = "race-events", version, about = "Find and manage running events")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every event, date ascending
    List,
    /// Filter events
    Search {
        #[arg(short, long, default_value = "")]
        keyword: String,
        #[arg(short, long = "distance")]
        distances: Vec<String>,
        #[arg(short = 't', long = "type")]
        event_types: Vec<EventType>,
        #[arg(short, long, default_value = "")]
        location: String,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },
    /// Create an event
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        date: String,
        #[arg(long)]
        location: String,
        #[arg(long)]
        distance: String,
        #[arg(long)]
        time: Option<String>,
        #[arg(long)]
        capacity: Option<i64>,
        #[arg(long, default_value = "Free")]
        price: String,
        #[arg(long = "type", default_value = "")]
        event_type: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Delete an event by id
    Delete { id: String },
    /// Upcoming events grouped for the calendar
    Buckets,
    /// Resolve marker positions for every event
    Markers,
    /// Address to coordinates
    Geocode { address: String },
    /// Coordinates to address
    Reverse { latitude: f64, longitude: f64 },
    /// Current position and its address
    Locate,
    /// Show or remember the list view mode
    View { mode: Option<ViewMode> },
    /// Register an account
    Signup {
        email: String,
        password: String,
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Confirm an account with the mailed token
    Confirm { email: String, token: String },
    /// Sign in and print the session
    Signin { email: String, password: String },
}

/// Writes markers as text lines.
#[derive(Default)]
struct ConsoleMap {
    next: MarkerId,
}

impl MapSurface for ConsoleMap {
    fn add_marker(&mut self, spec: &MarkerSpec) -> MarkerId {
        self.next += 1;
        println!(
            "#{:<3} {:<9} {}  {}",
            self.next, spec.color, spec.coordinates, spec.title
        );
        self.next
    }

    fn remove_marker(&mut self, _id: MarkerId) {}

    fn fit_bounds(&mut self, bounds: Bounds, padding_px: u32) {
        println!(
            "viewport: ({:.4}, {:.4}) .. ({:.4}, {:.4}) padding {padding_px}px",
            bounds.south, bounds.west, bounds.north, bounds.east
        );
    }
}

fn print_views(views: &[EventView]) {
    for view in views {
        println!(
            "{:<24} {}  {:<40} {:<36} {:<14} {}",
            view.id, view.date, view.title, view.location, view.distance, view.price
        );
    }
    println!("{} event(s)", views.len());
}

fn parse_bound(raw: Option<String>) -> Result<Option<EventDate>> {
    raw.map(|value| EventDate::parse(&value).with_context(|| format!("bad date: {value}")))
        .transpose()
}

fn print_notice(notice: Notice) {
    match notice {
        Notice::Success(message) => println!("{message}"),
        Notice::Failure(message) => eprintln!("error: {message}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    race_events::init_tracing();
    let args = Args::parse();
    let app = App::from_settings(Settings::from_env())?;

    match args.command {
        Command::List => {
            print_views(&app.events.all()?);
        }
        Command::Search {
            keyword,
            distances,
            event_types,
            location,
            from,
            to,
        } => {
            let criteria = FilterCriteria {
                keyword,
                distances,
                event_types,
                location,
                date_from: parse_bound(from)?,
                date_to: parse_bound(to)?,
                ..Default::default()
            };
            let found = app.events.search(&criteria)?;
            print_views(&found.iter().map(EventView::from).collect::<Vec<_>>());
        }
        Command::Add {
            title,
            date,
            location,
            distance,
            time,
            capacity,
            price,
            event_type,
            description,
        } => {
            let draft = NewEvent {
                title,
                date,
                time,
                location,
                distance,
                capacity,
                description,
                price,
                event_type,
                ..Default::default()
            };
            let result = app.events.create(&draft, None);
            if let Ok(event) = &result {
                println!("{}", event.id);
            }
            print_notice(Notice::from_result(&result, "Event created"));
        }
        Command::Delete { id } => {
            let result = app.events.delete(&id, None);
            print_notice(Notice::from_result(&result, "Event deleted"));
        }
        Command::Buckets => {
            let buckets = filter::upcoming_buckets(&app.events.events()?, app.today());
            for key in BUCKET_KEYS {
                let items = buckets.get(key).map(Vec::as_slice).unwrap_or_default();
                println!("{key} ({})", items.len());
                for item in items {
                    println!(
                        "  +{:<3} {}  {}",
                        item.days_until,
                        item.event.display_date(),
                        item.event.title
                    );
                }
            }
        }
        Command::Markers => {
            let events = app.events.events()?;
            let mut map = ConsoleMap::default();
            let mut layer = MarkerLayer::new();
            layer
                .render(&mut map, &events, &app.geocoder, app.today())
                .await;
        }
        Command::Geocode { address } => match app.geocoder.forward(&address).await {
            Some(coordinates) => println!("{coordinates}"),
            None => println!("no match for {address}"),
        },
        Command::Reverse {
            latitude,
            longitude,
        } => {
            let coordinates = Coordinates::new(latitude, longitude)
                .ok_or_else(|| anyhow!("coordinates out of range"))?;
            match app.geocoder.reverse(coordinates).await {
                Some(address) => println!("{address}"),
                None => println!("no address for {coordinates}"),
            }
        }
        Command::Locate => {
            let source = StaticPositionSource::new(app.settings.home_position);
            let here = current_position(&source).await?;
            println!("{here}");
            if let Some(address) = app.geocoder.reverse(here).await {
                println!("{address}");
            }
        }
        Command::View { mode } => {
            let config = match mode {
                Some(mode) => app.config.set_view_mode(mode)?,
                None => app.config.read(),
            };
            println!("{}", config.view_mode);
        }
        Command::Signup {
            email,
            password,
            name,
        } => {
            let pending = app.auth.sign_up(
                &email,
                &password,
                SignUpProfile {
                    display_name: name,
                    ..Default::default()
                },
            )?;
            println!("user {} created", pending.user.id);
            println!("confirmation token: {}", pending.confirmation_token);
        }
        Command::Confirm { email, token } => {
            let user = app.auth.confirm_email(&email, &token)?;
            println!("{} confirmed", user.email);
        }
        Command::Signin { email, password } => {
            let session = app.auth.sign_in(&email, &password)?;
            println!(
                "signed in as {} until {}",
                session.user.display_name,
                session.expires_at.to_rfc3339()
            );
        }
    }

    Ok(())
}
