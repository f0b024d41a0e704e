use clap::Parser;
use sensor_hub::app::Args;
use sensor_hub::error::AppRunError;
use sensor_hub::run;

fn main() -> Result<(), AppRunError> {
    run(Args::parse())
}
