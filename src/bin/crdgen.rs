use fleetnetd_kubernetes::crd;
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    print!(
        "{}",
        serde_yaml::to_string(&crd::target_group::TargetGroup::crd())?
    );
    println!("---");
    print!(
        "{}",
        serde_yaml::to_string(&crd::listener::Listener::crd())?
    );
    println!("---");
    print!(
        "{}",
        serde_yaml::to_string(&crd::target_group_binding::TargetGroupBinding::crd())?
    );
    println!("---");
    print!(
        "{}",
        serde_yaml::to_string(&crd::game_server_set::GameServerSet::crd())?
    );
    Ok(())
}
