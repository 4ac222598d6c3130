//! Prompt templates sent to the chat-completion model.

use crate::ai::{PromptMessage, Role};
use crate::models::{ChatTurn, Speaker};

const ANALYSIS_SYSTEM: &str = "You are an experienced interview coach. \
Evaluate the candidate's spoken answer to an interview question. \
Comment on structure, relevance, clarity and confidence, point out what worked, \
and give two or three concrete suggestions for improvement. \
Be specific, encouraging and concise.";

const QUESTIONS_SYSTEM: &str = "You are an interviewer preparing for a job interview. \
Write ten interview questions tailored to the job description you are given. \
Mix behavioral, situational and role-specific technical questions. \
Return one question per line without any other text.";

/// Material a follow-up chat is about.
#[derive(Debug, Clone, Copy)]
pub struct AnswerContext<'a> {
    pub question: &'a str,
    pub transcription: &'a str,
    pub analysis: &'a str,
}

pub fn analysis_messages(
    question: &str,
    industry: Option<&str>,
    transcription: &str,
) -> Vec<PromptMessage> {
    let mut user = format!("Interview question: {question}\n");
    if let Some(industry) = industry.map(str::trim).filter(|i| !i.is_empty()) {
        user.push_str(&format!("Industry: {industry}\n"));
    }
    user.push_str(&format!("Candidate's answer (transcribed): {transcription}"));

    vec![
        PromptMessage::new(Role::System, ANALYSIS_SYSTEM),
        PromptMessage::new(Role::User, user),
    ]
}

/// System prompt, the prior conversation, then the new user input.
pub fn chat_messages(
    context: AnswerContext<'_>,
    history: &[ChatTurn],
    input: &str,
) -> Vec<PromptMessage> {
    let system = format!(
        "You are an interview coach discussing a candidate's practice answer.\n\
         Interview question: {}\n\
         Candidate's answer (transcribed): {}\n\
         Your earlier feedback: {}\n\
         Answer the candidate's follow-up questions about this answer.",
        context.question, context.transcription, context.analysis
    );

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(PromptMessage::new(Role::System, system));
    messages.extend(history.iter().map(|turn| {
        let role = match turn.user {
            Speaker::User => Role::User,
            Speaker::Bot => Role::Assistant,
        };
        PromptMessage::new(role, turn.text.clone())
    }));
    messages.push(PromptMessage::new(Role::User, input));
    messages
}

pub fn question_messages(job_description: &str) -> Vec<PromptMessage> {
    vec![
        PromptMessage::new(Role::System, QUESTIONS_SYSTEM),
        PromptMessage::new(Role::User, format!("Job description: {job_description}")),
    ]
}

/// Splits a model reply into questions, dropping list markers such as
/// `1.`, `2)`, `-` or `*`.
pub fn parse_questions(reply: &str) -> Vec<String> {
    reply
        .lines()
        .map(|line| {
            let line = line.trim();
            let line = line.trim_start_matches(|c: char| c.is_ascii_digit());
            let line = line.trim_start_matches(['.', ')', '-', '*', '•']);
            line.trim().to_string()
        })
        .filter(|line| !line.is_empty())
        .collect()
}
