//! Prompt text and session options for the three model requests an overlay
//! makes: the explanation, the bare expansion and the web search query.

use serde::{Deserialize, Serialize};

use crate::model::{ChatMessage, SessionOptions};

/// Shown in the explanation panel when the model request fails.
pub const LOOKUP_FAILED_MESSAGE: &str = "An error occurred while processing the request.";

/// Stand-in for an unknown page title.
pub const UNKNOWN_TITLE: &str = "N/A";

const SEARCH_ENGINE_URL: &str = "https://www.google.com/search?q=";

/// Everything a lookup knows about the token it explains.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupInput {
    pub acronym: String,
    pub context: String,
    pub page_url: String,
}

const EXPLANATION_SYSTEM: &str = r#"You explain words, phrases and acronyms (the "target") as they are used in a piece of text. Each request gives you:

Target
Surrounding Text
URL of the Web Page
Title of the Web Page

Answer according to what the target is.
Words or phrases:
- Give the meaning of the target in this context.
- Give ONE example sentence using the target with the same meaning.

Acronyms:
- First line: ONLY the expanded form of the acronym as used in this context.
- Then: a short definition of the expanded form, in the style of an encyclopedia.

Code (shell commands, language syntax, types and so on):
- Briefly explain what the target does in the surrounding code.
- Give ONE code snippet that uses the target.

Answer in the language of the surrounding text."#;

const SEARCH_SYSTEM: &str = r#"You write web search queries that find the meaning of words, phrases and acronyms (the "target") in a given context. Each request gives you:

Target
Surrounding Text
URL
Title

Write one search query that finds what the target means in this specific context, shaped like "<target> meaning in <domain>".

Output ONLY the search query."#;

/// Few-shot conversation for the explanation request.
pub fn explanation_options() -> SessionOptions {
    let examples = [
        (
            LookupInput {
                acronym: "cloud".into(),
                context: "Many businesses are moving their data to the cloud to improve accessibility and security.".into(),
                page_url: "https://www.techinsights.com/cloud-computing".into(),
            },
            "The Future of Data Storage",
            "## Cloud computing services\n\nCloud computing services store data and run software on remote servers reached over the internet, instead of on local machines.\n\n> Our team keeps shared documents in the **cloud**.",
        ),
        (
            LookupInput {
                acronym: "FAQ".into(),
                context: "Before contacting support, please check the FAQ section for quick answers.".into(),
                page_url: "https://www.websitehelp.com/support".into(),
            },
            "Customer Support Resources",
            "## Frequently Asked Questions\n\nA list of common questions and their answers on one topic, meant to help readers with the usual issues.",
        ),
        (
            LookupInput {
                acronym: "-R".into(),
                context: "ssh -R 80:localhost:3000".into(),
                page_url: "https://www.digitalocean.com/community/tutorials/how-to-use-ssh-port-forwarding".into(),
            },
            "How to Use SSH Port Forwarding",
            "## Reverse SSH Tunneling\n\nThe `-R` option asks the SSH server to forward connections on its port 80 to port 3000 on the client's localhost, so anything reaching port 80 on the server is tunnelled to the local machine.\n\n> After `ssh -R 8080:localhost:5000 user@remote_host`, opening http://remote_host:8080 shows the app served on http://localhost:5000.",
        ),
    ];

    let mut initial_prompts = Vec::with_capacity(examples.len() * 2);
    for (input, title, answer) in examples {
        initial_prompts.push(ChatMessage::user(explanation_prompt(&input, Some(title))));
        initial_prompts.push(ChatMessage::assistant(answer));
    }
    SessionOptions {
        system_prompt: Some(EXPLANATION_SYSTEM.to_string()),
        initial_prompts,
        ..Default::default()
    }
}

pub fn explanation_prompt(input: &LookupInput, title: Option<&str>) -> String {
    format!(
        "Target:\n\"{}\"\n\nSurrounding Text:\n\"{}\"\n\nURL of the Web Page:\n\"{}\"\n\nTitle of the Web Page:\n\"{}\"",
        input.acronym,
        input.context,
        input.page_url,
        title.unwrap_or(UNKNOWN_TITLE),
    )
}

/// The expansion request runs without a system prompt and is kept as
/// deterministic as the provider allows.
pub fn expansion_options() -> SessionOptions {
    SessionOptions {
        temperature: Some(0.0),
        top_k: Some(1),
        ..Default::default()
    }
}

pub fn expansion_prompt(input: &LookupInput) -> String {
    format!(
        "What does \"{}\" mean in \"{}\"? If it is an acronym, ONLY output the expanded phrase. Respond in English.",
        input.acronym, input.context
    )
}

pub fn search_options() -> SessionOptions {
    let example = LookupInput {
        acronym: "REST".into(),
        context: "The REST API allows developers to integrate our services into their applications.".into(),
        page_url: "https://developer.example.com/docs".into(),
    };
    SessionOptions {
        system_prompt: Some(SEARCH_SYSTEM.to_string()),
        initial_prompts: vec![
            ChatMessage::user(search_prompt(&example, Some("Developer Documentation"))),
            ChatMessage::assistant("REST meaning in software development"),
        ],
        ..Default::default()
    }
}

pub fn search_prompt(input: &LookupInput, title: Option<&str>) -> String {
    format!(
        "Target: \"{}\"\nSurrounding Text: \"{}\"\nURL: \"{}\"\nTitle: \"{}\"",
        input.acronym,
        input.context,
        input.page_url,
        title.unwrap_or(UNKNOWN_TITLE),
    )
}

/// Search engine URL for a generated query, or `None` if the query is blank.
pub fn search_url(query: &str) -> Option<String> {
    let query = query.trim().trim_matches('"').trim();
    if query.is_empty() {
        return None;
    }
    Some(format!("{SEARCH_ENGINE_URL}{}", urlencoding::encode(query)))
}

/// First line of a model answer, stripped of markdown heading marks and
/// quotes. Used to read a bare expansion out of a chatty reply.
pub fn first_line(answer: &str) -> Option<String> {
    let line = answer
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())?
        .trim_start_matches('#')
        .trim()
        .trim_matches('"')
        .trim();
    (!line.is_empty()).then(|| line.to_string())
}
