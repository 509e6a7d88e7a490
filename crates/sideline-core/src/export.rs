//! Match report export in JSON and Markdown.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::models::{EventKind, FieldPosition, SessionSnapshot, Side};
use crate::util::{format_match_clock, format_timestamp_ms};

/// Export output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportFormat {
    Json,
    Markdown,
}

impl ExportFormat {
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Markdown => "md",
        }
    }
}

/// One logged event as it appears in a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEvent {
    pub id: String,
    pub minute: String,
    pub kind: String,
    pub side: Side,
    pub player: Option<String>,
    pub detail: Option<String>,
}

/// Serializable match report. Retracted events and erased drawings are left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchReport {
    pub session_id: String,
    pub team_name: String,
    pub opponent_name: String,
    pub home_score: u32,
    pub away_score: u32,
    pub phase: String,
    pub period: u32,
    pub elapsed: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub events: Vec<ReportEvent>,
    pub players_on_field: Vec<String>,
    pub drawing_count: usize,
}

fn event_detail(kind: &EventKind) -> Option<String> {
    match kind {
        EventKind::Goal => None,
        EventKind::Card { color } => Some(format!("{color:?}").to_lowercase()),
        EventKind::Substitution { replaced } => replaced
            .as_ref()
            .map(|player| format!("replaces {player}")),
    }
}

#[must_use]
pub fn build_match_report(snapshot: &SessionSnapshot) -> MatchReport {
    let events = snapshot
        .active_events()
        .map(|event| ReportEvent {
            id: event.id.to_string(),
            minute: format_match_clock(event.at_secs),
            kind: event.kind.label().to_string(),
            side: event.side,
            player: event.player_id.as_ref().map(ToString::to_string),
            detail: event_detail(&event.kind),
        })
        .collect();

    let players_on_field = snapshot
        .positions
        .iter()
        .filter(|(_, placement)| matches!(placement.position, FieldPosition::OnField { .. }))
        .map(|(player, _)| player.to_string())
        .collect();

    MatchReport {
        session_id: snapshot.id.to_string(),
        team_name: snapshot.team_name.clone(),
        opponent_name: snapshot.opponent_name.clone(),
        home_score: snapshot.score.home,
        away_score: snapshot.score.away,
        phase: snapshot.phase.to_string(),
        period: snapshot.period,
        elapsed: format_match_clock(snapshot.elapsed_secs),
        created_at: snapshot.created_at,
        updated_at: snapshot.updated_at,
        events,
        players_on_field,
        drawing_count: snapshot.visible_drawings().count(),
    }
}

/// Render a report as pretty-printed JSON.
pub fn render_json_export(snapshot: &SessionSnapshot) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&build_match_report(snapshot))
}

/// Render a report as Markdown with a frontmatter block.
#[must_use]
pub fn render_markdown_export(snapshot: &SessionSnapshot) -> String {
    let report = build_match_report(snapshot);
    let mut output = String::new();

    let _ = writeln!(output, "---");
    let _ = writeln!(output, "id: {}", report.session_id);
    let _ = writeln!(output, "created_at: {}", report.created_at);
    let _ = writeln!(output, "updated_at: {}", report.updated_at);
    let _ = writeln!(output, "---");
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "# {} {} - {} {}",
        report.team_name, report.home_score, report.away_score, report.opponent_name
    );
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "Played {}. Period {}, {} ({}).",
        format_timestamp_ms(report.created_at),
        report.period,
        report.elapsed,
        report.phase
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Events");
    let _ = writeln!(output);
    if report.events.is_empty() {
        let _ = writeln!(output, "No events logged.");
    }
    for event in &report.events {
        let mut line = format!("- {} {} ({})", event.minute, event.kind, event.side);
        if let Some(player) = &event.player {
            let _ = write!(line, " #{player}");
        }
        if let Some(detail) = &event.detail {
            let _ = write!(line, ", {detail}");
        }
        let _ = writeln!(output, "{line}");
    }

    if !report.players_on_field.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## On field");
        let _ = writeln!(output);
        let _ = writeln!(output, "{}", report.players_on_field.join(", "));
    }

    output
}

/// Render a report in the selected format.
pub fn render_session_export(
    snapshot: &SessionSnapshot,
    format: ExportFormat,
) -> serde_json::Result<String> {
    match format {
        ExportFormat::Json => render_json_export(snapshot),
        ExportFormat::Markdown => Ok(render_markdown_export(snapshot)),
    }
}

/// Build a deterministic default file name for export flows.
#[must_use]
pub fn suggested_export_file_name(format: ExportFormat, timestamp_ms: i64) -> String {
    format!("sideline-report-{timestamp_ms}.{}", format.extension())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::{Clock as _, ManualClock};
    use crate::models::{CardColor, EventDraft, NewSession, PlayerId};
    use crate::session::SessionMachine;

    fn played_session() -> SessionSnapshot {
        let clock = ManualClock::new(1_700_000_000_000);
        let config = NewSession {
            team_name: "Rovers".to_string(),
            opponent_name: "United".to_string(),
            roster: vec![PlayerId::new("7"), PlayerId::new("10")],
            ..Default::default()
        };
        let mut machine = SessionMachine::new(
            SessionSnapshot::new(&config, clock.now_ms()),
            Arc::new(clock.clone()),
        );
        machine.start().unwrap();
        machine
            .move_player(PlayerId::new("7"), FieldPosition::OnField { x: 0.5, y: 0.4 })
            .unwrap();
        clock.advance_secs(754);
        machine
            .record_event(EventDraft::new(EventKind::Goal, Side::Home).with_player("7"))
            .unwrap();
        clock.advance_secs(60);
        let card = EventDraft::new(
            EventKind::Card {
                color: CardColor::Yellow,
            },
            Side::Away,
        );
        let card_id = card.id;
        machine.record_event(card).unwrap();
        machine
            .record_event(EventDraft::new(EventKind::Goal, Side::Away))
            .unwrap();
        machine.retract_event(card_id).unwrap();
        machine.snapshot().clone()
    }

    #[test]
    fn report_leaves_out_retracted_events() {
        let report = build_match_report(&played_session());
        assert_eq!(report.events.len(), 2);
        assert_eq!(report.home_score, 1);
        assert_eq!(report.away_score, 1);
        assert_eq!(report.events[0].minute, "12:34");
        assert_eq!(report.events[0].player.as_deref(), Some("7"));
        assert_eq!(report.players_on_field, vec!["7".to_string()]);
    }

    #[test]
    fn markdown_has_frontmatter_and_scoreline() {
        let snapshot = played_session();
        let rendered = render_markdown_export(&snapshot);
        assert!(rendered.starts_with("---\n"));
        assert!(rendered.contains(&format!("id: {}", snapshot.id)));
        assert!(rendered.contains("# Rovers 1 - 1 United"));
        assert!(rendered.contains("- 12:34 goal (home) #7"));
        assert!(!rendered.contains("card"));
    }

    #[test]
    fn json_export_parses_back() {
        let snapshot = played_session();
        let rendered = render_session_export(&snapshot, ExportFormat::Json).unwrap();
        let parsed: MatchReport = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, build_match_report(&snapshot));
    }

    #[test]
    fn suggested_export_file_name_uses_format_extension() {
        assert_eq!(
            suggested_export_file_name(ExportFormat::Json, 123),
            "sideline-report-123.json"
        );
        assert_eq!(
            suggested_export_file_name(ExportFormat::Markdown, 456),
            "sideline-report-456.md"
        );
    }
}
