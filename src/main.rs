fn main() {
    lake_sensor_pipeline::cli::run();
}
