use cgi_gateway::config::Config;
use cgi_gateway::error::ErrorPages;
use cgi_gateway::http::Request;
use cgi_gateway::launcher::{self, InPlace, Launcher};
use cgi_gateway::params::ProcessEnv;
use cgi_gateway::resolver::SystemResolver;
use cgi_gateway::sys::SystemOs;
use log::error;
use std::env;
use std::fs;
use std::io;
use std::process;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        eprintln!("usage: {} <config.yaml> <request.yaml>", args[0]);
        process::exit(2);
    }

    let config = match Config::from_file(&args[1]) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };

    let request = match fs::read_to_string(&args[2])
        .map_err(|e| e.to_string())
        .and_then(|s| Request::from_yaml(&s).map_err(|e| e.to_string()))
    {
        Ok(req) => req,
        Err(e) => {
            eprintln!("Error loading request {}: {}", args[2], e);
            process::exit(1);
        }
    };

    let control = match config.find_control(&request.path) {
        Some(c) => c,
        None => {
            eprintln!("No control matches {}", request.path);
            process::exit(1);
        }
    };

    let pages = ErrorPages::new(&config.server);
    let mut launcher = Launcher {
        os: &SystemOs,
        server: &config.server,
        env: &ProcessEnv,
        lookup: &SystemResolver,
        reply: &pages,
        out: io::stdout(),
    };

    if let Err(e) = launcher::process_cgi(&InPlace, &mut launcher, &request, control) {
        error!("{} {}: {}", request.method, request.url, e);
        process::exit(1);
    }
}
