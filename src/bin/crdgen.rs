use kmm_operator::crd::Module;
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&Module::crd())?);
    Ok(())
}
