use super::*;

#[test]
fn params_round_trip_each_query_kind() {
    let start = NaiveDate::from_ymd_opt(2025, 1, 1).expect("date");
    let end = NaiveDate::from_ymd_opt(2025, 1, 31).expect("date");
    for query in [
        TaskQuery::All,
        TaskQuery::Assignee {
            name: "嵐欽".into(),
        },
        TaskQuery::DateRange { start, end },
    ] {
        let params = TaskQueryParams::from(&query);
        assert_eq!(params.into_query(), Ok(query));
    }
}

#[test]
fn half_open_range_is_rejected() {
    let params = TaskQueryParams {
        from: NaiveDate::from_ymd_opt(2025, 1, 1),
        ..TaskQueryParams::default()
    };
    assert!(params.into_query().is_err());
}

#[test]
fn snapshot_event_is_tagged() {
    let event = ServerEvent::TaskSnapshot { tasks: Vec::new() };
    let json = serde_json::to_value(&event).expect("json");
    assert_eq!(json["type"], "task_snapshot");
    assert_eq!(json["payload"]["tasks"], serde_json::json!([]));
}
