/// Integration-level tests for the `shared` wire types.
///
/// Each section tests one module; unit tests that are tightly coupled to
/// private helpers live inside the modules themselves.
// ---------------------------------------------------------------------------
// UpdateEvent wire shape
// ---------------------------------------------------------------------------
#[cfg(test)]
mod update_event_tests {
    use shared::types::*;

    fn sample() -> UpdateEvent {
        UpdateEvent::new(
            EntityKind::Highlight,
            UpdateAction::Create,
            serde_json::json!({"id": 12, "title": "Bicycle kick"}),
        )
    }

    #[test]
    fn event_json_uses_type_key_and_lowercase_enums() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["type"], "highlight");
        assert_eq!(json["action"], "create");
        assert_eq!(json["data"]["title"], "Bicycle kick");
        assert!(json["timestamp"].is_i64());
        assert!(json["id"].is_string());
        assert!(json.get("kind").is_none());
    }

    #[test]
    fn event_deserializes_from_wire_shape() {
        let raw = r#"{
            "id": "6f1c1c9e-2b1f-4f57-8c39-0c2b7b8d4f10",
            "type": "featured",
            "action": "delete",
            "data": {"id": 1},
            "timestamp": 1700000000000
        }"#;
        let ev: UpdateEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(ev.kind, EntityKind::Featured);
        assert_eq!(ev.action, UpdateAction::Delete);
        assert_eq!(ev.timestamp, 1_700_000_000_000);
        assert_eq!(
            ev.id,
            UpdateId::parse("6f1c1c9e-2b1f-4f57-8c39-0c2b7b8d4f10").unwrap()
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        let raw = r#"{"id":"6f1c1c9e-2b1f-4f57-8c39-0c2b7b8d4f10","type":"team",
                      "action":"create","data":{},"timestamp":0}"#;
        assert!(serde_json::from_str::<UpdateEvent>(raw).is_err());
    }

    #[test]
    fn fresh_events_get_distinct_ids() {
        assert_ne!(sample().id, sample().id);
    }

    #[test]
    fn collections_match_api_paths() {
        let paths: Vec<&str> = EntityKind::ALL.iter().map(|k| k.collection()).collect();
        assert_eq!(
            paths,
            vec!["matches", "leagues", "videos", "featured", "highlights"]
        );
    }
}

// ---------------------------------------------------------------------------
// Content records
// ---------------------------------------------------------------------------

#[cfg(test)]
mod record_tests {
    use shared::types::*;

    #[test]
    fn record_serializes_flat() {
        let rec = Highlight {
            id: 4,
            fields: HighlightFields {
                title: "Last-minute equaliser".into(),
                video_url: "https://cdn.example.com/h/4.mp4".into(),
                thumbnail_url: None,
                description: None,
                match_id: Some(9),
            },
            created_at: 10,
            updated_at: 11,
        };
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["id"], 4);
        assert_eq!(json["title"], "Last-minute equaliser");
        assert_eq!(json["match_id"], 9);
        assert!(json.get("fields").is_none());

        let back: Highlight = serde_json::from_value(json).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn match_fields_default_optional_parts() {
        let raw = r#"{"home_team":"A","away_team":"B","kickoff":1}"#;
        let m: MatchFields = serde_json::from_str(raw).unwrap();
        assert_eq!(m.status, MatchStatus::Scheduled);
        assert_eq!(m.league_id, None);
        assert!(m.validate().is_ok());
    }

    #[test]
    fn league_match_count_defaults_to_zero() {
        let l: LeagueFields = serde_json::from_str(r#"{"name":"Premier"}"#).unwrap();
        assert_eq!(l.match_count, 0);
    }

    #[test]
    fn kinds_are_bound_to_field_types() {
        assert_eq!(MatchFields::KIND, EntityKind::Match);
        assert_eq!(LeagueFields::KIND, EntityKind::League);
        assert_eq!(VideoFields::KIND, EntityKind::Video);
        assert_eq!(HighlightFields::KIND, EntityKind::Highlight);
        assert_eq!(FeaturedFields::KIND, EntityKind::Featured);
    }
}

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

#[cfg(test)]
mod envelope_tests {
    use shared::types::*;

    #[test]
    fn success_envelope_yields_data() {
        let env: ApiEnvelope<Vec<i64>> =
            serde_json::from_str(r#"{"status":"success","data":[1,2]}"#).unwrap();
        assert_eq!(env.into_result().unwrap(), vec![1, 2]);
    }

    #[test]
    fn null_data_decodes_as_none() {
        let env: ApiEnvelope<Option<FeaturedVideo>> =
            serde_json::from_str(r#"{"status":"success","data":null}"#).unwrap();
        assert!(env.into_result().unwrap().is_none());
    }

    #[test]
    fn error_envelope_yields_code_and_message() {
        let env: ApiEnvelope<Vec<i64>> = serde_json::from_str(
            r#"{"status":"error","code":"NOT_FOUND","message":"Highlight 3 not found"}"#,
        )
        .unwrap();
        let err = env.into_result().unwrap_err();
        assert_eq!(err.code, "NOT_FOUND");
        assert_eq!(err.status, "error");
    }

    #[test]
    fn success_envelope_serializes_with_status_tag() {
        let env = ApiEnvelope::Success {
            data: DeletedRef { id: 3 },
        };
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json, serde_json::json!({"status":"success","data":{"id":3}}));
    }
}
