use turnstile::{Config, build_rocket};

#[rocket::launch]
fn rocket() -> rocket::Rocket<rocket::Build> {
    dotenvy::dotenv().ok();

    let config = Config::load().unwrap_or_else(|err| panic!("Failed to load configuration: {err}"));

    build_rocket(config)
}
