//! Reply text: fixed tables and the blocks the commands answer with.

use std::time::Duration;

use rand::Rng;

use crate::{messaging::types::OutgoingMessage, utils::format_duration};

pub const ALIVE_ANNOUNCEMENT: &str = "I'm alive and online!";

pub const FAREWELLS: [&str; 5] = [
    "Goodbye! Filters go with me.",
    "See you later, alligator.",
    "Signing off. Stay curious!",
    "Shutting down... it was fun while it lasted.",
    "Peace out!",
];

pub const UNKNOWN_QUIPS: [&str; 6] = [
    "Sorry, I didn't catch that.",
    "Hmm, that's not a command I know.",
    "I'm just a simple bot. Try one of these:",
    "Come again?",
    "Beep boop, does not compute.",
    "Not sure what you mean.",
];

const HELP_HEADER: &str = "Here's what I can do:";

const HELP_BODY: &str = "`help` - show this message\n\
`ping` - show uptime\n\
`list` - show current filters\n\
`add <f1, f2, ...>` - add filters (comma separated)\n\
`del <f1, f2, ...>` - delete filters\n\
`clear` - remove all filters\n\
`exit` | `quit` - shut the bot down";

/// Source of randomness for reply selection.
pub trait ReplyPicker: Send + Sync {
    /// Index in `0..len`. `len` is never zero.
    fn pick(&self, len: usize) -> usize;
}

/// Uniform selection backed by the thread RNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomPicker;

impl ReplyPicker for RandomPicker {
    fn pick(&self, len: usize) -> usize {
        rand::thread_rng().gen_range(0..len)
    }
}

pub fn choose<'a>(picker: &dyn ReplyPicker, table: &[&'a str]) -> &'a str {
    let idx = picker.pick(table.len());
    table[idx.min(table.len() - 1)]
}

pub fn help_block(header: &str) -> OutgoingMessage {
    OutgoingMessage::block(header, HELP_BODY)
}

pub fn help() -> OutgoingMessage {
    help_block(HELP_HEADER)
}

pub fn unknown(picker: &dyn ReplyPicker) -> OutgoingMessage {
    help_block(choose(picker, &UNKNOWN_QUIPS))
}

pub fn farewell(picker: &dyn ReplyPicker) -> OutgoingMessage {
    OutgoingMessage::Text(choose(picker, &FAREWELLS).to_string())
}

pub fn uptime(uptime: Duration) -> OutgoingMessage {
    OutgoingMessage::block("Uptime", format_duration(uptime))
}

pub fn filter_list<'a>(filters: impl IntoIterator<Item = &'a str>) -> OutgoingMessage {
    OutgoingMessage::block("Current filters", join_or_none(filters))
}

pub fn filters_cleared() -> OutgoingMessage {
    OutgoingMessage::Text("All filters cleared.".to_string())
}

pub fn filters_added(added: &[String]) -> OutgoingMessage {
    OutgoingMessage::block("Filters added", join_or_none(added.iter().map(String::as_str)))
}

pub fn filters_deleted(removed: &[String]) -> OutgoingMessage {
    OutgoingMessage::block(
        "Filters deleted",
        join_or_none(removed.iter().map(String::as_str)),
    )
}

fn join_or_none<'a>(items: impl IntoIterator<Item = &'a str>) -> String {
    let joined = items.into_iter().collect::<Vec<_>>().join("\n");
    if joined.is_empty() {
        "None".to_string()
    } else {
        joined
    }
}
