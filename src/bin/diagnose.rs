use cf_tracker::codeforces::{ActivitySource, CodeforcesClient, PAGE_SIZE};
use cf_tracker::config::TrackerConfig;
use cf_tracker::mailer::{Notifier, SmtpMailer};
use cf_tracker::scheduler::{effective_expression, parse_schedule};
use chrono::Utc;
use std::io::{self, Write};

fn prompt(question: &str) -> io::Result<String> {
    print!("{}", question);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(answer.trim().to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 cf_tracker - Diagnostics Tool");
    println!("================================");
    println!();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.json".to_string());
    let config = TrackerConfig::load(&config_path)?;

    println!("🌐 API: {}", config.codeforces.base_url);
    println!("🤖 User agent: {}", config.codeforces.user_agent);
    println!("🗄️  Database: {}", config.database.path);
    println!();

    // Test 1: Schedule expression
    println!("Test 1: Checking schedule...");
    let expression = match effective_expression(&config.schedule.expression, config.schedule.cadence)
    {
        Ok(expression) => expression,
        Err(e) => {
            println!("❌ {}", e);
            return Ok(());
        }
    };
    match parse_schedule(&expression) {
        Ok(schedule) => {
            println!("✅ Schedule is valid: {} (UTC)", expression);
            if let Some(next) = schedule.upcoming(Utc).next() {
                println!("   Next run: {}", next);
            }
        }
        Err(e) => {
            println!("❌ {}", e);
            return Ok(());
        }
    }
    println!();

    // Test 2: Activity API
    println!("Test 2: Checking the Codeforces API...");
    let handle = prompt("Enter a handle to look up (or press Enter for 'tourist'): ")?;
    let handle = if handle.is_empty() { "tourist".to_string() } else { handle };

    let client = CodeforcesClient::new(&config.codeforces)?;
    match client.fetch_profile(&handle).await {
        Ok(profile) => {
            println!("✅ Profile fetched");
            println!("   Handle: {}", profile.handle);
            println!("   Rating: {}", profile.rating.unwrap_or(0));
            println!("   Max rating: {}", profile.max_rating.unwrap_or(0));
        }
        Err(e) => {
            println!("❌ {}", e);
            return Ok(());
        }
    }
    match client.fetch_rating_history(&handle).await {
        Ok(contests) => println!("✅ Rating history: {} contests", contests.len()),
        Err(e) => {
            println!("❌ {}", e);
            return Ok(());
        }
    }
    match client.fetch_submissions(&handle, 1, PAGE_SIZE).await {
        Ok(page) => println!("✅ First submissions page: {} entries", page.len()),
        Err(e) => {
            println!("❌ {}", e);
            return Ok(());
        }
    }
    println!();

    // Test 3: Mail
    println!("Test 3: Testing mail delivery...");
    let recipient = prompt("Enter recipient email (or press Enter to skip): ")?;

    if !recipient.is_empty() {
        let mailer = SmtpMailer::new(config.mail.clone());
        match mailer
            .send(
                &recipient,
                "cf_tracker test",
                "🧪 Test message from cf_tracker diagnostics - Connection OK!",
            )
            .await
        {
            Ok(()) => println!("✅ Test message sent successfully"),
            Err(e) if e.is_configuration() => {
                println!("⚠️  {}", e);
                println!("   Set the mail section or EMAIL_* variables");
                return Ok(());
            }
            Err(e) => {
                println!("❌ {}", e);
                return Ok(());
            }
        }
    } else {
        println!("⚠️  Skipping mail test");
    }
    println!();

    println!("================================");
    println!("✅ All checks passed!");
    println!("================================");
    println!();
    println!("If scheduled syncs still don't run, check:");
    println!("  1. The daemon is running: ps aux | grep cf_tracker");
    println!("  2. Type 'status' in the daemon console to see the next run");
    println!("  3. Check logs: tail -f {}/cf_tracker_*.log", config.logs.path);
    println!("  4. Run with debug: RUST_LOG=debug ./target/release/cf_tracker run --config {}", config_path);
    println!();

    Ok(())
}
