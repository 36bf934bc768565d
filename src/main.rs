fn main() {
    skybridge::run();
}
