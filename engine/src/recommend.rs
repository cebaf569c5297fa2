use crate::context::{Category, Issue};

/// Advice shown when the issue list is empty.
pub const GENERIC_RECOMMENDATIONS: [&str; 3] = [
    "Check pod logs",
    "Examine events",
    "Verify network connectivity",
];

/// Advice for categories without a dedicated table entry.
const FALLBACK: [&str; 1] = ["Check pod logs; examine events"];

/// Fixed recommendation bag per category.
pub fn recommendations_for(category: Category) -> &'static [&'static str] {
    match category {
        Category::ImagePullError => &[
            "Check image name and tag for typos.",
            "Check image name and credentials for accessing private registries.",
            "Verify the image exists in the registry.",
        ],
        Category::HealthCheckFailure => &[
            "Review liveness and readiness probe configuration.",
            "Check whether the application is listening on the probed port.",
            "Increase probe initial delay if the application starts slowly.",
        ],
        Category::ResourceIssue => &[
            "Review resource requests and limits for the workload.",
            "Check node capacity and cluster autoscaling.",
        ],
        Category::CrashLoopBackOff => &[
            "Check container logs for errors.",
            "Verify the container command and arguments.",
            "Check for missing configuration or secrets the process needs at startup.",
        ],
        Category::SyncIssue => &[
            "Compare the live state with the desired state in the GitOps application.",
            "Trigger a manual sync once the difference is understood.",
        ],
        Category::SyncFailure => &[
            "Inspect the sync operation logs in the GitOps controller.",
            "Verify the target revision renders valid manifests.",
        ],
        Category::PipelineIssue => &[
            "Open the failing pipeline and inspect the first failing job.",
            "Re-run the pipeline after fixing the failing stage.",
        ],
        Category::DeploymentIssue => &[
            "Inspect the deployment job logs in the source host.",
            "Verify the target environment configuration.",
        ],
        Category::PodNotRunning => &[
            "Describe the pod to see scheduling and container state.",
            "Check pod logs",
        ],
        Category::PodNotReady => &[
            "Check readiness probe results for each container.",
            "Examine events",
        ],
        Category::PodInitializing => &[
            "Wait for image pulls and init containers to finish.",
            "Check init container logs if initialization is stuck.",
        ],
        Category::InitializationIssue => &[
            "Check init container logs and exit codes.",
        ],
        Category::ContainerReadinessIssue => &[
            "Check readiness probe configuration and container logs.",
        ],
        Category::VolumeIssue => &[
            "Verify the PersistentVolumeClaim exists and is bound.",
            "Check the storage class and provisioner health.",
        ],
        Category::SchedulingIssue => &[
            "Check node selectors, taints, and tolerations.",
            "Verify the cluster has capacity for the requested resources.",
        ],
        Category::DeploymentNotAvailable => &[
            "Inspect the replica sets and pods behind the deployment.",
            "Check pod logs",
        ],
        Category::DeploymentNotReady => &[
            "Check readiness of the newest replica set's pods.",
        ],
        Category::DeploymentNotProgressing => &[
            "Check the deployment's progress deadline and rollout status.",
            "Roll back if the new revision cannot become ready.",
        ],
        Category::ContainerWaiting => &[
            "Describe the pod to see the waiting reason.",
        ],
        Category::ContainerTerminated => &[
            "Check container logs for errors.",
            "Inspect the exit code and termination reason.",
        ],
        Category::FrequentRestarts => &[
            "Check container logs for errors.",
            "Review memory limits; repeated OOM kills show up as restarts.",
        ],
        Category::UnknownIssue => &[
            "Check pod logs",
            "Examine events",
        ],
        Category::OtherWarning => &[
            "Examine events",
        ],
        // PodFailed, PodPending, HealthIssue and any future additions use
        // the generic advice.
        _ => &FALLBACK,
    }
}

/// Collect recommendations for a set of issues, deduplicated in first-seen
/// order. An empty issue list yields the generic set.
pub fn recommend(issues: &[Issue]) -> Vec<String> {
    if issues.is_empty() {
        return GENERIC_RECOMMENDATIONS.iter().map(|s| s.to_string()).collect();
    }
    let mut out: Vec<String> = Vec::new();
    for issue in issues {
        for rec in recommendations_for(issue.category) {
            if !out.iter().any(|existing| existing == rec) {
                out.push(rec.to_string());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{IssueSource, Severity};

    fn issue(category: Category) -> Issue {
        Issue {
            title: "t".into(),
            category,
            severity: Severity::Warning,
            source: IssueSource::Kubernetes,
            description: "d".into(),
        }
    }

    #[test]
    fn empty_issue_list_gets_generic_set() {
        let recs = recommend(&[]);
        assert_eq!(recs, GENERIC_RECOMMENDATIONS.map(String::from).to_vec());
    }

    #[test]
    fn crash_loop_includes_log_advice() {
        let recs = recommend(&[issue(Category::CrashLoopBackOff)]);
        assert!(recs.iter().any(|r| r == "Check container logs for errors."));
    }

    #[test]
    fn image_pull_includes_registry_advice() {
        let recs = recommend(&[issue(Category::ImagePullError)]);
        assert!(recs.iter().any(|r| {
            r == "Check image name and credentials for accessing private registries."
        }));
    }

    #[test]
    fn recommendations_dedupe_across_issues() {
        let recs = recommend(&[
            issue(Category::CrashLoopBackOff),
            issue(Category::ContainerTerminated),
            issue(Category::FrequentRestarts),
        ]);
        let log_advice = recs
            .iter()
            .filter(|r| *r == "Check container logs for errors.")
            .count();
        assert_eq!(log_advice, 1);
    }

    #[test]
    fn uncovered_categories_fall_back() {
        let recs = recommend(&[issue(Category::PodFailed)]);
        assert_eq!(recs, vec!["Check pod logs; examine events".to_string()]);
    }
}
