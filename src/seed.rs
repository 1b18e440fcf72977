use chrono::{Duration, Utc};

use crate::dates::EventDate;
use crate::models::{Distance, Event, EventType, Price};

struct Sample {
    id: &'static str,
    title: &'static str,
    description: &'static str,
    organizer: &'static str,
    offset_days: i64,
    time: &'static str,
    location: &'static str,
    coordinates: Option<(f64, f64)>,
    distances: &'static str,
    event_type: Option<EventType>,
    capacity: u32,
    participants: u32,
    price: &'static str,
}

const SAMPLES: [Sample; 10] = [
    Sample {
        id: "seed-01",
        title: "Maratona Internacional de São Paulo",
        description: "Percurso oficial pelas principais avenidas da cidade.",
        organizer: "Yescom",
        offset_days: 12,
        time: "06:00",
        location: "Praça Charles Miller, São Paulo, SP",
        coordinates: Some((-23.5475, -46.6654)),
        distances: "42K, 21K, 10K",
        event_type: Some(EventType::OfficialRace),
        capacity: 15000,
        participants: 11234,
        price: "R$ 189,90",
    },
    Sample {
        id: "seed-02",
        title: "Corrida Noturna Recife",
        description: "Prova noturna na orla de Boa Viagem.",
        organizer: "Recife Runners",
        offset_days: 5,
        time: "19:30",
        location: "Boa Viagem, Recife, PE",
        coordinates: None,
        distances: "5K, 10K",
        event_type: Some(EventType::OfficialRace),
        capacity: 3000,
        participants: 1450,
        price: "R$ 90,00",
    },
    Sample {
        id: "seed-03",
        title: "Treino Longão no Ibirapuera",
        description: "Treino coletivo preparatório para a maratona de julho.",
        organizer: "Assessoria Pace Certo",
        offset_days: 2,
        time: "06:30",
        location: "Parque Ibirapuera, São Paulo, SP",
        coordinates: Some((-23.5874, -46.6576)),
        distances: "21K",
        event_type: Some(EventType::TrainingRun),
        capacity: 80,
        participants: 42,
        price: "Free",
    },
    Sample {
        id: "seed-04",
        title: "Meia Maratona do Rio",
        description: "Largada no Leblon com chegada no Aterro do Flamengo.",
        organizer: "Spiridon",
        offset_days: 34,
        time: "07:00",
        location: "Leblon, Rio de Janeiro, RJ",
        coordinates: Some((-22.9847, -43.2233)),
        distances: "Half Marathon, 5K",
        event_type: Some(EventType::OfficialRace),
        capacity: 20000,
        participants: 17320,
        price: "R$ 159,00",
    },
    Sample {
        id: "seed-05",
        title: "Corrida Solidária Curitiba",
        description: "Toda a renda revertida para o hospital infantil.",
        organizer: "Instituto Passo a Passo",
        offset_days: 20,
        time: "08:00",
        location: "Parque Barigui, Curitiba, PR",
        coordinates: None,
        distances: "3K, 5K",
        event_type: Some(EventType::CharityEvent),
        capacity: 1200,
        participants: 300,
        price: "R$ 50,00",
    },
    Sample {
        id: "seed-06",
        title: "Desafio Virtual 10K",
        description: "Corra onde quiser e envie o seu tempo pelo aplicativo.",
        organizer: "Run Anywhere",
        offset_days: 45,
        time: "",
        location: "Online",
        coordinates: None,
        distances: "10K",
        event_type: Some(EventType::VirtualRun),
        capacity: 5000,
        participants: 812,
        price: "R$ 39,90",
    },
    Sample {
        id: "seed-07",
        title: "Ultra Trail Serra da Mantiqueira",
        description: "Trilhas técnicas com 2.500 m de ganho de elevação.",
        organizer: "Mantiqueira Outdoor",
        offset_days: 60,
        time: "05:00",
        location: "Campos do Jordão, SP",
        coordinates: None,
        distances: "Ultra, 25K",
        event_type: Some(EventType::TrailRun),
        capacity: 600,
        participants: 410,
        price: "R$ 320,00",
    },
    Sample {
        id: "seed-08",
        title: "Porto Alegre Night Run",
        description: "Clima de festa às margens do Guaíba, aquecimento para a maratona de inverno.",
        organizer: "Sul Eventos",
        offset_days: -10,
        time: "20:00",
        location: "Orla do Guaíba, Porto Alegre, RS",
        coordinates: None,
        distances: "5K, 10K",
        event_type: Some(EventType::OfficialRace),
        capacity: 4000,
        participants: 3999,
        price: "R$ 110,00",
    },
    Sample {
        id: "seed-09",
        title: "Rústica de Brasília",
        description: "Tradicional corrida de rua pelo Eixo Monumental.",
        organizer: "Federação Brasiliense",
        offset_days: 75,
        time: "07:00",
        location: "Eixo Monumental, Brasília, DF",
        coordinates: Some((-15.7939, -47.8828)),
        distances: "10K",
        event_type: Some(EventType::OfficialRace),
        capacity: 8000,
        participants: 2100,
        price: "0",
    },
    Sample {
        id: "seed-10",
        title: "Trail Kids Florianópolis",
        description: "Percurso curto de trilha para crianças de 6 a 12 anos.",
        organizer: "Floripa Trail",
        offset_days: 27,
        time: "09:00",
        location: "Lagoa da Conceição, Florianópolis, SC",
        coordinates: None,
        distances: "Kids Run",
        event_type: Some(EventType::TrailRun),
        capacity: 150,
        participants: 20,
        price: "Grátis",
    },
];

/// Demo dataset, dated relative to today so the calendar always has
/// upcoming entries.
pub fn default_events() -> Vec<Event> {
    let today = Utc::now().date_naive();
    let created_at = Utc::now();
    SAMPLES
        .iter()
        .map(|sample| Event {
            id: sample.id.to_string(),
            title: sample.title.to_string(),
            description: sample.description.to_string(),
            organizer: Some(sample.organizer.to_string()),
            date: Some(EventDate::new(today + Duration::days(sample.offset_days))),
            time: (!sample.time.is_empty()).then(|| sample.time.to_string()),
            location: sample.location.to_string(),
            latitude: sample.coordinates.map(|(lat, _)| lat),
            longitude: sample.coordinates.map(|(_, lon)| lon),
            distances: Distance::parse_list(sample.distances),
            event_type: sample.event_type,
            capacity: Some(sample.capacity),
            participants: sample.participants,
            price: Price::parse(sample.price).unwrap_or_default(),
            image_url: None,
            creator_id: None,
            created_at,
        })
        .collect()
}
