//! Prints the Website CRD manifest as YAML.
//!
//! ```sh
//! cargo run -p crds --bin crdgen > deploy/crd.yaml
//! ```

use crds::Website;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&Website::crd())?);
    Ok(())
}
