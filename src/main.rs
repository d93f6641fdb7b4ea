fn main() {
    ocean_drift::start();
}
