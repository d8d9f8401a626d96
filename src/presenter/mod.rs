//! Pure formatter: turns a queued prompt plus queue metadata into a chat
//! message body and button-keyboard layout.
//!
//! Grounded in the teacher's `src/slack/blocks.rs` Block Kit builders,
//! reshaped around the four prompt kinds this daemon actually presents
//! (permission / multi_choice / input / context) instead of the
//! approval/prompt/stall surfaces the teacher used them for.

use slack_morphism::prelude::{
    SlackActionBlockElement, SlackActionsBlock, SlackBlock, SlackBlockButtonElement,
    SlackBlockId, SlackBlockPlainTextOnly, SlackBlockText, SlackSectionBlock,
};

use crate::models::{CallbackData, PermissionChoice, QueueCommand, QueuedRequest, RequestKind};
use crate::queue::RequestQueue;

/// A rendered prompt: fallback text plus Block Kit blocks.
#[derive(Debug, Clone)]
pub struct Presentation {
    /// Plain-text fallback for notifications/accessibility.
    pub text: String,
    /// Block Kit blocks to post.
    pub blocks: Vec<SlackBlock>,
}

/// Render the active request for presentation, including the "N more
/// waiting" footer and `[Skip] [Show All]` buttons when the FIFO is
/// non-empty.
#[must_use]
pub fn render(request: &QueuedRequest, queue: &RequestQueue) -> Presentation {
    let visual = queue
        .summary()
        .into_iter()
        .find(|entry| entry.is_active)
        .map_or("⚪", |entry| entry.visual_id);

    let (body, mut blocks) = match &request.kind {
        RequestKind::Permission => render_permission(visual, &request.prompt),
        RequestKind::MultiChoice { options } => render_multi_choice(visual, &request.prompt, options),
        RequestKind::Input => render_input(visual, &request.prompt),
        RequestKind::Context => render_context(visual, &request.session, &request.prompt),
    };

    let pending = queue.size();
    if pending > 0 {
        blocks.push(footer_section(pending));
        blocks.push(queue_footer_buttons());
    }

    Presentation { text: body, blocks }
}

fn render_permission(visual: &str, prompt: &str) -> (String, Vec<SlackBlock>) {
    let body = format!("{visual} Permission: {}", escape_mrkdwn(prompt));
    let buttons = action_buttons(&[
        ("Yes", CallbackData::Permission(PermissionChoice::Yes)),
        ("Always", CallbackData::Permission(PermissionChoice::Always)),
        ("No", CallbackData::Permission(PermissionChoice::No)),
    ]);
    (body.clone(), vec![text_section(&body), buttons])
}

fn render_multi_choice(
    visual: &str,
    prompt: &str,
    options: &[crate::models::ChoiceOption],
) -> (String, Vec<SlackBlock>) {
    let mut body = format!("{visual} {}", escape_mrkdwn(prompt));
    for option in options {
        body.push_str(&format!(
            "\n• *{}* — {}",
            escape_mrkdwn(&option.label),
            escape_mrkdwn(&option.description)
        ));
    }

    let mut entries: Vec<(&str, CallbackData)> = options
        .iter()
        .map(|option| (option.label.as_str(), CallbackData::OptionLabel(option.label.clone())))
        .collect();
    entries.push(("Other (type reply)", CallbackData::OptionOther));

    (body.clone(), vec![text_section(&body), action_buttons(&entries)])
}

fn render_input(visual: &str, prompt: &str) -> (String, Vec<SlackBlock>) {
    let body = format!("{visual} {}", escape_mrkdwn(prompt));
    (body.clone(), vec![text_section(&body)])
}

fn render_context(visual: &str, session: &str, snippet: &str) -> (String, Vec<SlackBlock>) {
    let body = format!("{visual} {session}: {}", escape_mrkdwn(snippet));
    let buttons = action_buttons(&[("Reply", CallbackData::Reply(session.to_owned()))]);
    (body.clone(), vec![text_section(&body), buttons])
}

fn footer_section(pending: usize) -> SlackBlock {
    text_section(&format!("{pending} more requests waiting"))
}

fn queue_footer_buttons() -> SlackBlock {
    action_buttons(&[
        ("Skip", CallbackData::Cmd(QueueCommand::Skip)),
        ("Show All", CallbackData::Cmd(QueueCommand::ShowQueue)),
    ])
}

fn text_section(text: &str) -> SlackBlock {
    SlackBlock::Section(SlackSectionBlock::new().with_text(SlackBlockText::MarkDown(text.into())))
}

fn action_buttons(buttons: &[(&str, CallbackData)]) -> SlackBlock {
    let elements: Vec<SlackActionBlockElement> = buttons
        .iter()
        .map(|(label, data)| {
            SlackActionBlockElement::Button(
                SlackBlockButtonElement::new((*label).into(), SlackBlockPlainTextOnly::from(*label))
                    .with_value(data.to_wire()),
            )
        })
        .collect();
    SlackBlock::Actions(SlackActionsBlock::new(elements).with_block_id(SlackBlockId("afk_actions".into())))
}

/// Escape Slack mrkdwn special characters.
#[must_use]
pub fn escape_mrkdwn(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::models::{ChoiceOption, QueuedRequest};

    #[test]
    fn permission_body_shows_visual_id_and_prompt() {
        let mut queue = RequestQueue::new();
        queue.enqueue(QueuedRequest::new(
            "api_a1b2c3",
            RequestKind::Permission,
            "run tests",
            PathBuf::from("/tmp/x"),
        ));
        let request = queue.active().expect("active").clone();
        let presentation = render(&request, &queue);
        assert!(presentation.text.contains("Permission: run tests"));
        assert_eq!(presentation.blocks.len(), 2);
    }

    #[test]
    fn multi_choice_lists_every_option_and_other() {
        let options = vec![
            ChoiceOption { label: "Red".into(), description: "the color red".into() },
            ChoiceOption { label: "Blue".into(), description: "the color blue".into() },
        ];
        let mut queue = RequestQueue::new();
        queue.enqueue(QueuedRequest::new(
            "api_a1b2c3",
            RequestKind::MultiChoice { options },
            "pick a color",
            PathBuf::from("/tmp/x"),
        ));
        let request = queue.active().expect("active").clone();
        let presentation = render(&request, &queue);
        assert!(presentation.text.contains("Red"));
        assert!(presentation.text.contains("Blue"));
    }

    #[test]
    fn footer_appears_only_when_fifo_nonempty() {
        let mut queue = RequestQueue::new();
        queue.enqueue(QueuedRequest::new(
            "a", RequestKind::Input, "p", PathBuf::from("/tmp/x"),
        ));
        let request = queue.active().expect("active").clone();
        let no_footer = render(&request, &queue);
        assert_eq!(no_footer.blocks.len(), 1);

        queue.enqueue(QueuedRequest::new(
            "b", RequestKind::Input, "p2", PathBuf::from("/tmp/y"),
        ));
        let with_footer = render(&request, &queue);
        assert_eq!(with_footer.blocks.len(), 3);
    }

    #[test]
    fn escapes_mrkdwn_special_characters() {
        assert_eq!(escape_mrkdwn("a < b & c > d"), "a &lt; b &amp; c &gt; d");
    }
}
