fn main() {
    // ESP-IDF toolchain environment is only needed when building for the
    // device; host builds (tests, simulation) skip it.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
