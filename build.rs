fn main() {
    // ESP-IDF environment (linker args, sdkconfig) is only needed for the
    // firmware build; host builds and tests skip it.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
