use gdbridge::HostClass;

#[derive(HostClass)]
#[class(base = Object)]
struct Beacon;

fn main() {
    let _ = Beacon;
}
