use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;

const TOKEN_FILE: &str = ".coach_token";

#[derive(Parser)]
#[command(name = "coach-cli")]
#[command(about = "CLI for the Interview Coach API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, default_value = "http://localhost:5000")]
    url: String,

    /// Access token; defaults to the one saved by `login`
    #[arg(short, long, env = "COACH_TOKEN")]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    Register {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    Login {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    /// Upload an answer for transcription and analysis
    Transcribe {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(short, long)]
        question: String,
        #[arg(short, long)]
        industry: Option<String>,
    },
    /// Ask a follow-up question about a recording
    Chat {
        #[arg(short, long)]
        recording: String,
        #[arg(short, long)]
        message: String,
    },
    Recordings,
    DeleteRecording {
        #[arg(short, long)]
        id: String,
    },
    /// Audio and chat quota status
    Usage,
    Profile,
    Logout,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
}

fn mime_for(path: &std::path::Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("mp3") => "audio/mpeg",
        Some("m4a") => "audio/x-m4a",
        _ => "audio/wav",
    }
}

fn authorized(request: RequestBuilder, token: &str) -> RequestBuilder {
    request.header("Authorization", format!("Bearer {}", token))
}

async fn print_response(res: Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let body = res.text().await?;
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(value) => println!("{} {}", status, serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{} {}", status, body),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = Client::new();
    let url = cli.url.trim_end_matches('/').to_string();
    let token = cli
        .token
        .or_else(|| fs::read_to_string(TOKEN_FILE).ok())
        .map(|t| t.trim().to_string())
        .unwrap_or_default();

    match cli.command {
        Commands::Register { email, password } => {
            let res = client
                .post(format!("{}/auth/register", url))
                .json(&json!({ "email": email, "password": password }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Login { email, password } => {
            let res = client
                .post(format!("{}/auth/login", url))
                .json(&json!({ "email": email, "password": password }))
                .send()
                .await?;
            if res.status().is_success() {
                let body: LoginResponse = res.json().await?;
                fs::write(TOKEN_FILE, body.access_token)?;
                println!("Logged in. Token saved to {}", TOKEN_FILE);
            } else {
                println!("Login failed: {}", res.text().await?);
            }
        }
        Commands::Transcribe {
            file,
            question,
            industry,
        } => {
            let bytes = fs::read(&file)?;
            let file_name = file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "answer.wav".to_string());
            let audio = Part::bytes(bytes)
                .file_name(file_name)
                .mime_str(mime_for(&file))?;
            let mut form = Form::new().part("audio", audio).text("question", question);
            if let Some(industry) = industry {
                form = form.text("industry", industry);
            }
            let res = authorized(client.post(format!("{}/api/transcribe", url)), &token)
                .multipart(form)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Chat { recording, message } => {
            let res = authorized(client.post(format!("{}/api/chat", url)), &token)
                .json(&json!({ "recordingId": recording, "input": message }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Recordings => {
            let res = authorized(client.get(format!("{}/api/recordings", url)), &token)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::DeleteRecording { id } => {
            let res = authorized(
                client.delete(format!("{}/api/recordings/{}", url, id)),
                &token,
            )
            .send()
            .await?;
            print_response(res).await?;
        }
        Commands::Usage => {
            for path in ["check-audio-limit", "check-chat-limit"] {
                let res = authorized(client.get(format!("{}/api/{}", url, path)), &token)
                    .send()
                    .await?;
                println!("{}:", path);
                print_response(res).await?;
            }
        }
        Commands::Profile => {
            let res = authorized(client.get(format!("{}/api/profile", url)), &token)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Logout => {
            let _ = fs::remove_file(TOKEN_FILE);
            println!("Logged out (token removed).");
        }
    }

    Ok(())
}
