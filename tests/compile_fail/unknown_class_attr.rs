use gdbridge::HostClass;

#[derive(HostClass)]
#[class(base = Object, flavour)]
struct Beacon;

fn main() {
    let _ = Beacon;
}
