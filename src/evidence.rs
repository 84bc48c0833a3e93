//! # Evidence assembly
//!
//! Renders retrieved turns into one citation-numbered, budget-limited block of
//! text for the consuming language model.
//!
//! - Turns are sorted chronologically: `turn_number` ascending, user before assistant.
//! - Each turn becomes one line:
//!   `[Evidence #<n> | turn <turn> | <role> | <created_at>] <content>`, with runs
//!   of whitespace in the content collapsed to single spaces. A turn with blank
//!   content still gets its numbered block, ending at the closing bracket.
//! - Lines are accepted while the output, separators included, stays within
//!   `max_chars` characters. The first line that would overflow ends assembly;
//!   there are no partial lines and no reordering to squeeze more in.
//!
//! An empty input yields an empty string, which callers read as "no evidence".
//!
//! ```
//! use hindsight::evidence::assemble;
//!
//! assert_eq!(assemble(&[], 1200), "");
//! ```

use crate::models::Turn;

const SEPARATOR: &str = "\n";

/// Render `turns` as numbered evidence no longer than `max_chars` characters.
pub fn assemble(turns: &[Turn], max_chars: usize) -> String {
    let mut ordered: Vec<&Turn> = turns.iter().collect();
    ordered.sort_by_key(|turn| (turn.turn_number, turn.role));

    let mut output = String::new();
    let mut used = 0usize;
    let mut citation = 1usize;

    for turn in ordered {
        let content = collapse_whitespace(&turn.content);
        let block = render_block(citation, turn, &content);
        let separator = if output.is_empty() { "" } else { SEPARATOR };
        let cost = separator.chars().count() + block.chars().count();
        if used + cost > max_chars {
            break;
        }

        output.push_str(separator);
        output.push_str(&block);
        used += cost;
        citation += 1;
    }

    output
}

fn render_block(citation: usize, turn: &Turn, content: &str) -> String {
    let header = format!(
        "[Evidence #{} | turn {} | {} | {}]",
        citation, turn.turn_number, turn.role, turn.created_at
    );
    if content.is_empty() {
        return header;
    }
    format!("{header} {content}")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn turn(turn_number: i32, role: Role, content: &str) -> Turn {
        Turn {
            id: turn_number * 2 + i32::from(role == Role::Assistant),
            session_id: "s".into(),
            turn_number,
            role,
            content: content.into(),
            timestamp: 0.0,
            created_at: "2026-10-18 09:00:00".into(),
        }
    }

    #[test]
    fn test_empty_input_is_empty_for_any_budget() {
        for budget in [0, 1, 10, 10_000] {
            assert_eq!(assemble(&[], budget), "");
        }
    }

    #[test]
    fn test_orders_chronologically_and_numbers_citations() {
        let turns = vec![
            turn(2, Role::Assistant, "second answer"),
            turn(1, Role::Assistant, "first answer"),
            turn(2, Role::User, "second question"),
            turn(1, Role::User, "first question"),
        ];

        let text = assemble(&turns, 10_000);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            "[Evidence #1 | turn 1 | user | 2026-10-18 09:00:00] first question"
        );
        assert!(lines[1].starts_with("[Evidence #2 | turn 1 | assistant"));
        assert!(lines[2].ends_with("second question"));
        assert!(lines[3].starts_with("[Evidence #4 | turn 2 | assistant"));
    }

    #[test]
    fn test_collapses_whitespace_and_numbers_blank_turns() {
        let turns = vec![
            turn(1, Role::User, "  lots   of\n\tspace  "),
            turn(1, Role::Assistant, " \n "),
            turn(2, Role::User, "next"),
        ];

        let text = assemble(&turns, 10_000);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("] lots of space"));
        assert_eq!(
            lines[1],
            "[Evidence #2 | turn 1 | assistant | 2026-10-18 09:00:00]"
        );
        assert!(lines[2].starts_with("[Evidence #3 | turn 2 | user"));
    }

    #[test]
    fn test_stops_at_first_block_over_budget() {
        let turns = vec![
            turn(1, Role::User, "short"),
            turn(1, Role::Assistant, &"x".repeat(500)),
            turn(2, Role::User, "short"),
        ];
        let first_only = assemble(&turns[..1], 10_000);

        let text = assemble(&turns, first_only.chars().count() + 100);
        assert_eq!(text, first_only);
    }

    #[test]
    fn test_output_never_exceeds_budget() {
        let turns: Vec<Turn> = (1..=20)
            .flat_map(|n| {
                [
                    turn(n, Role::User, &"我叫小王 ".repeat(n as usize)),
                    turn(n, Role::Assistant, "你好，小王"),
                ]
            })
            .collect();

        for budget in [0, 5, 60, 61, 62, 200, 777, 5000] {
            let text = assemble(&turns, budget);
            assert!(text.chars().count() <= budget, "budget {budget} exceeded");
        }
    }

    #[test]
    fn test_budget_counts_separators() {
        let turns = vec![turn(1, Role::User, "a"), turn(1, Role::Assistant, "b")];
        let one = assemble(&turns[..1], 10_000).chars().count();
        let both = assemble(&turns, 10_000);
        let two = both.chars().count();

        assert_eq!(assemble(&turns, two - 1).chars().count(), one);
        assert_eq!(assemble(&turns, two), both);
    }
}
