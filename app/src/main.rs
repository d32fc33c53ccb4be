use mcubes_app::{App, AppArgs, DefaultAppArgs};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    mcubes_graphics::init();
    mcubes_app::init();

    let args = DefaultAppArgs::parse();
    if let Err(e) = App::new(args).run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
