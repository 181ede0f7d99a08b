pub mod error;
pub mod middleware;
pub mod routes;

pub type DeploymentImpl = deployment::LocalDeployment;
